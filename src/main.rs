use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Watches the codes API and notifies subscribers about new redemption codes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run a single code check and exit
    #[arg(long)]
    once: bool,

    /// Seconds between code checks (overrides POLL_INTERVAL_SECS)
    #[arg(long, short = 'i')]
    interval_secs: Option<u64>,

    /// Directory for persisted state (overrides STATE_PATH)
    #[arg(long)]
    state_path: Option<String>,

    /// Do not start the web API
    #[arg(long)]
    no_web: bool,
}

mod clock;
mod codes;
mod config;
mod cycle;
mod detection;
mod error;
mod fetch;
mod logging;
mod notify;
mod state;
#[cfg(test)]
mod testing;
mod web;

use config::AppConfig;
use cycle::{spawn_scheduler, DetectionCycle};
use fetch::HttpCodeSource;
use notify::{Dispatcher, HttpPushGateway, LogDelivery, PushDelivery};
use state::{
    create_shared_snapshot_store, create_shared_subscriber_directory, JsonSubscriberDirectory,
    SnapshotStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Log buffer backing the /logs endpoints
    let log_buffer = logging::create_log_buffer(1000);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .with(logging::LogCaptureLayer::new(log_buffer.clone()))
        .init();

    let mut config = AppConfig::from_env();
    if let Some(secs) = args.interval_secs {
        config.poll_interval = std::time::Duration::from_secs(secs);
    }
    if let Some(path) = args.state_path {
        config.state_path = path;
    }
    if args.no_web {
        config.web_enabled = false;
    }
    config.validate()?;

    // Ensure state directory exists
    tokio::fs::create_dir_all(&config.state_path).await.ok();

    info!("Loading last known codes...");
    let snapshot_file = config.snapshot_file();
    let store = SnapshotStore::load(&snapshot_file).await.unwrap_or_else(|e| {
        warn!("Could not load last known codes: {}, starting from a fresh baseline", e);
        SnapshotStore::new()
    });
    let store = create_shared_snapshot_store(store);

    info!("Loading subscribers...");
    let subscribers_file = config.subscribers_file();
    let subscribers = JsonSubscriberDirectory::load(&subscribers_file).await?;
    let subscribers = create_shared_subscriber_directory(subscribers);

    let clock = clock::system_clock();
    let source = Arc::new(HttpCodeSource::new(
        config.codes_api_url.clone(),
        config.fetch_timeout,
        clock.clone(),
    )?);

    let delivery: Arc<dyn PushDelivery> = match &config.push_gateway_url {
        Some(url) => {
            info!("Delivering notifications through {}", url);
            Arc::new(HttpPushGateway::new(
                url.clone(),
                config.push_gateway_key.clone(),
                config.delivery_timeout,
            )?)
        }
        None => {
            warn!("PUSH_GATEWAY_URL not set: notifications will only be logged");
            Arc::new(LogDelivery)
        }
    };

    let dispatcher = Dispatcher::new(delivery, subscribers.clone(), config.dispatch_settings());
    let detection = Arc::new(DetectionCycle::new(
        source,
        store.clone(),
        subscribers.clone(),
        dispatcher,
        Some(snapshot_file),
    ));

    if args.once {
        info!("--once: running a single code check against {}", config.codes_api_url);
        let report = detection.run_cycle().await?;
        info!(
            "Check complete: {} new codes, {}/{} notifications delivered",
            report.new_codes.values().sum::<usize>(),
            report.delivered(),
            report.outcomes.len()
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let web_task = if config.web_enabled {
        let web_config = web::WebServerConfig {
            http_port: config.http_port,
        };
        let api_state = web::ApiState {
            store,
            subscribers,
            cycle: detection.clone(),
            log_buffer,
            clock,
        };
        let web_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = web::start_web_server(web_config, api_state, web_shutdown).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        info!("Web API disabled");
        None
    };

    let scheduler = spawn_scheduler(
        detection,
        config.poll_interval,
        config.poll_interval,
        shutdown_rx,
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {}", e);
    }
    if let Some(web_task) = web_task {
        let _ = web_task.await;
    }

    warn!("Code watcher stopped.");
    Ok(())
}
