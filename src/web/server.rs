//! HTTP server hosting the JSON API

use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::api::{api_router, ApiState};

/// Web server configuration
pub struct WebServerConfig {
    pub http_port: u16,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self { http_port: 8080 }
    }
}

/// Serve the API until `shutdown` fires
pub async fn start_web_server(
    config: WebServerConfig,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    // Front-ends are served from other origins
    let app = api_router(state).layer(CorsLayer::permissive());

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.changed().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("Web API listening on http://{}", addr);

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Web API stopped");
    Ok(())
}
