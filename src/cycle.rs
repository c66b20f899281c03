//! Detection cycle (fetch, diff, replace, dispatch) and the periodic trigger
//! that drives it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::codes::Game;
use crate::detection::detect_new;
use crate::error::CodeForgeError;
use crate::fetch::CodeSource;
use crate::notify::{DeliveryOutcome, Dispatcher};
use crate::state::{SharedSnapshotStore, SubscriberDirectory};

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("A detection cycle is already running")]
    AlreadyRunning,

    #[error("Fetching codes failed: {0}")]
    Fetch(#[source] CodeForgeError),

    #[error("Subscriber directory unavailable: {0}")]
    Directory(#[source] CodeForgeError),
}

/// Summary of one completed cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub fetched_at: DateTime<Utc>,

    /// No earlier snapshot existed, so this one only set the baseline
    pub baseline: bool,

    /// New codes per game
    pub new_codes: BTreeMap<Game, usize>,

    pub outcomes: Vec<DeliveryOutcome>,
}

impl CycleReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }
}

/// Runs detection cycles against one snapshot store, one at a time
pub struct DetectionCycle {
    source: Arc<dyn CodeSource>,
    store: SharedSnapshotStore,
    directory: Arc<dyn SubscriberDirectory>,
    dispatcher: Arc<Dispatcher>,
    /// Where the snapshot is persisted after each replacement
    state_file: Option<String>,
    running: Arc<Mutex<()>>,
}

impl DetectionCycle {
    pub fn new(
        source: Arc<dyn CodeSource>,
        store: SharedSnapshotStore,
        directory: Arc<dyn SubscriberDirectory>,
        dispatcher: Dispatcher,
        state_file: Option<String>,
    ) -> Self {
        Self {
            source,
            store,
            directory,
            dispatcher: Arc::new(dispatcher),
            state_file,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &SharedSnapshotStore {
        &self.store
    }

    /// Run one cycle now, or fail with `AlreadyRunning` if one is in progress.
    ///
    /// The store is only replaced once fetch and parse succeeded and, when
    /// there is something to announce, the subscriber list was read. From
    /// then on dispatch runs on its own task and holds the cycle until it
    /// finishes, so dropping this future does not lose notifications.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let running = self
            .running
            .clone()
            .try_lock_owned()
            .map_err(|_| CycleError::AlreadyRunning)?;

        let current = self.source.fetch().await.map_err(CycleError::Fetch)?;
        let previous = self.store.get();
        let new_codes = detect_new(previous.as_deref(), &current);

        let subscribers = if new_codes.is_empty() {
            Vec::new()
        } else {
            self.directory.list().await.map_err(CycleError::Directory)?
        };

        let fetched_at = current.fetched_at;
        let total_codes = current.total_codes();
        let counts = new_codes.counts();
        self.store.replace(current);

        let dispatch = if new_codes.is_empty() {
            None
        } else {
            info!("Detected {} new codes: {:?}", new_codes.total(), counts);
            let dispatcher = self.dispatcher.clone();
            Some(tokio::spawn(async move {
                let _running = running;
                dispatcher.dispatch(&new_codes, &subscribers).await
            }))
        };

        if let Some(path) = &self.state_file {
            if let Err(e) = self.store.save(path).await {
                error!("Failed to persist snapshot to {}: {}", path, e);
            }
        }

        let outcomes = match dispatch {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                error!("Notification dispatch task failed: {}", e);
                Vec::new()
            }),
            None => {
                if previous.is_none() {
                    info!("Recorded baseline snapshot with {} codes", total_codes);
                } else {
                    info!("No new codes ({} codes tracked)", total_codes);
                }
                Vec::new()
            }
        };

        Ok(CycleReport {
            fetched_at,
            baseline: previous.is_none(),
            new_codes: counts,
            outcomes,
        })
    }
}

pub type SharedDetectionCycle = Arc<DetectionCycle>;

/// Spawns the periodic trigger. A failed or timed-out cycle is logged and the
/// next tick still fires; ticks missed while a cycle runs are skipped.
pub fn spawn_scheduler(
    cycle: SharedDetectionCycle,
    period: Duration,
    cycle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Checking for new codes every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                result = tokio::time::timeout(cycle_timeout, cycle.run_cycle()) => {
                    match result {
                        Ok(Ok(report)) => {
                            if !report.outcomes.is_empty() {
                                info!(
                                    "Cycle complete: {}/{} notifications delivered",
                                    report.delivered(),
                                    report.outcomes.len()
                                );
                            }
                        }
                        Ok(Err(CycleError::AlreadyRunning)) => {
                            warn!("Skipping scheduled check, previous cycle still running");
                        }
                        Ok(Err(e)) => error!("Code check failed: {}", e),
                        Err(_) => error!("Code check timed out after {}s", cycle_timeout.as_secs()),
                    }
                }
                _ = shutdown.changed() => {
                    warn!("Shutdown requested, abandoning in-flight code check");
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{CodeRecord, Snapshot};
    use crate::notify::delivery::{DeliveryError, FailureKind};
    use crate::notify::DispatchSettings;
    use crate::state::{create_shared_snapshot_store, SnapshotStore, Subscriber};
    use crate::testing::{RecordingDelivery, RecordingDirectory, ScriptedSource};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn snapshot(entries: &[(Game, &[&str])]) -> Snapshot {
        let games: BTreeMap<Game, Vec<CodeRecord>> = entries
            .iter()
            .map(|(game, codes)| (*game, codes.iter().map(|c| CodeRecord::new(*c)).collect()))
            .collect();
        Snapshot::new(games, Utc::now())
    }

    struct Harness {
        cycle: Arc<DetectionCycle>,
        source: Arc<ScriptedSource>,
        delivery: Arc<RecordingDelivery>,
        directory: Arc<RecordingDirectory>,
    }

    fn harness(
        responses: Vec<crate::error::Result<Snapshot>>,
        directory: RecordingDirectory,
        initial: Option<Snapshot>,
    ) -> Harness {
        let source = Arc::new(ScriptedSource::new(responses));
        let delivery = Arc::new(RecordingDelivery::new());
        let directory = Arc::new(directory);
        let store = create_shared_snapshot_store(match initial {
            Some(snapshot) => SnapshotStore::with_snapshot(snapshot),
            None => SnapshotStore::new(),
        });
        let dispatcher = Dispatcher::new(delivery.clone(), directory.clone(), DispatchSettings::default());
        let cycle = Arc::new(DetectionCycle::new(
            source.clone(),
            store,
            directory.clone(),
            dispatcher,
            None,
        ));

        Harness {
            cycle,
            source,
            delivery,
            directory,
        }
    }

    #[tokio::test]
    async fn test_cold_start_records_baseline_without_notifying() {
        let h = harness(
            vec![Ok(snapshot(&[(Game::Hsr, &["NEW1"])]))],
            RecordingDirectory::new(vec![Subscriber::new("u1", "tok-1")]),
            None,
        );

        let report = h.cycle.run_cycle().await.unwrap();

        assert!(report.baseline);
        assert!(report.new_codes.is_empty());
        assert!(h.delivery.sent().is_empty());
        assert_eq!(h.cycle.store().get().unwrap().total_codes(), 1);
    }

    #[tokio::test]
    async fn test_new_codes_are_announced_once() {
        let h = harness(
            vec![
                Ok(snapshot(&[(Game::Genshin, &["ABC123", "XYZ789"])])),
                Ok(snapshot(&[(Game::Genshin, &["ABC123", "XYZ789"])])),
            ],
            RecordingDirectory::new(vec![Subscriber::new("u1", "tok-1")]),
            Some(snapshot(&[(Game::Genshin, &["ABC123"])])),
        );

        let first = h.cycle.run_cycle().await.unwrap();
        assert_eq!(first.new_codes.get(&Game::Genshin), Some(&1));
        assert_eq!(first.delivered(), 1);

        let second = h.cycle.run_cycle().await.unwrap();
        assert!(second.new_codes.is_empty());
        assert!(second.outcomes.is_empty());

        let sent = h.delivery.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.body, "1 new code for Genshin Impact");
    }

    #[tokio::test]
    async fn test_store_replaced_even_without_new_codes() {
        // Replacement is unconditional, so a code that drops out and returns is seen again
        let h = harness(
            vec![
                Ok(snapshot(&[(Game::Zzz, &["A"])])),
                Ok(snapshot(&[(Game::Zzz, &["A", "B"])])),
            ],
            RecordingDirectory::new(vec![]),
            Some(snapshot(&[(Game::Zzz, &["A", "B"])])),
        );

        let first = h.cycle.run_cycle().await.unwrap();
        assert!(first.new_codes.is_empty());
        assert_eq!(h.cycle.store().get().unwrap().total_codes(), 1);

        let second = h.cycle.run_cycle().await.unwrap();
        assert_eq!(second.new_codes.get(&Game::Zzz), Some(&1));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_store_untouched() {
        let initial = snapshot(&[(Game::Genshin, &["A"])]);
        let h = harness(
            vec![Err(CodeForgeError::Upstream {
                retcode: -1,
                message: "maintenance".to_string(),
            })],
            RecordingDirectory::new(vec![]),
            Some(initial.clone()),
        );

        let result = h.cycle.run_cycle().await;

        assert!(matches!(result, Err(CycleError::Fetch(CodeForgeError::Upstream { .. }))));
        assert_eq!(h.cycle.store().get().unwrap().as_ref(), &initial);
    }

    #[tokio::test]
    async fn test_directory_failure_retries_next_cycle() {
        let initial = snapshot(&[(Game::Genshin, &["A"])]);
        let h = harness(
            vec![Ok(snapshot(&[(Game::Genshin, &["A", "B"])]))],
            RecordingDirectory::new(vec![]).unavailable(),
            Some(initial.clone()),
        );

        let result = h.cycle.run_cycle().await;

        assert!(matches!(result, Err(CycleError::Directory(_))));
        assert_eq!(h.cycle.store().get().unwrap().as_ref(), &initial);
        assert!(h.delivery.sent().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_token_cleared_during_cycle() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot(&[(Game::Hsr, &["H1"])]))]));
        let delivery = Arc::new(
            RecordingDelivery::new().fail_for("tok-1", DeliveryError::InvalidToken),
        );
        let directory = Arc::new(RecordingDirectory::new(vec![
            Subscriber::new("u1", "tok-1"),
            Subscriber::new("u2", "tok-2"),
        ]));
        let store = create_shared_snapshot_store(SnapshotStore::with_snapshot(snapshot(&[])));
        let dispatcher = Dispatcher::new(delivery.clone(), directory.clone(), DispatchSettings::default());
        let cycle = DetectionCycle::new(source, store, directory.clone(), dispatcher, None);

        let report = cycle.run_cycle().await.unwrap();

        assert_eq!(report.outcomes[0].failure_kind(), Some(FailureKind::InvalidToken));
        assert!(report.outcomes[1].is_delivered());
        assert_eq!(directory.cleared(), vec![("u1".to_string(), "tok-1".to_string())]);
    }

    #[tokio::test]
    async fn test_persists_snapshot_after_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_known_codes.json");
        let path = path.to_str().unwrap().to_string();

        let source = Arc::new(ScriptedSource::new(vec![Ok(snapshot(&[(Game::Zzz, &["Z1"])]))]));
        let directory = Arc::new(RecordingDirectory::new(vec![]));
        let store = create_shared_snapshot_store(SnapshotStore::new());
        let dispatcher = Dispatcher::new(
            Arc::new(RecordingDelivery::new()),
            directory.clone(),
            DispatchSettings::default(),
        );
        let cycle = DetectionCycle::new(source, store, directory, dispatcher, Some(path.clone()));

        cycle.run_cycle().await.unwrap();

        let reloaded = SnapshotStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get().unwrap().codes(Game::Zzz).unwrap()[0].code, "Z1");
    }

    /// Blocks every fetch until released
    struct GatedSource {
        gate: Notify,
    }

    #[async_trait]
    impl CodeSource for GatedSource {
        async fn fetch(&self) -> crate::error::Result<Snapshot> {
            self.gate.notified().await;
            Ok(snapshot(&[]))
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycles_are_rejected() {
        let source = Arc::new(GatedSource { gate: Notify::new() });
        let directory = Arc::new(RecordingDirectory::new(vec![]));
        let dispatcher = Dispatcher::new(
            Arc::new(RecordingDelivery::new()),
            directory.clone(),
            DispatchSettings::default(),
        );
        let cycle = Arc::new(DetectionCycle::new(
            source.clone(),
            create_shared_snapshot_store(SnapshotStore::new()),
            directory,
            dispatcher,
            None,
        ));

        let first = tokio::spawn({
            let cycle = cycle.clone();
            async move { cycle.run_cycle().await }
        });
        tokio::task::yield_now().await;
        while cycle.running.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(cycle.run_cycle().await, Err(CycleError::AlreadyRunning)));

        source.gate.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_scheduler_survives_failures_and_stops_on_shutdown() {
        let h = harness(
            vec![
                Err(CodeForgeError::Transport {
                    message: "offline".to_string(),
                }),
                Ok(snapshot(&[(Game::Genshin, &["A"])])),
                Ok(snapshot(&[(Game::Genshin, &["A", "B"])])),
            ],
            RecordingDirectory::new(vec![Subscriber::new("u1", "tok-1")]),
            None,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_scheduler(
            h.cycle.clone(),
            Duration::from_millis(20),
            Duration::from_secs(5),
            shutdown_rx,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.source.calls() < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.delivery.sent().len(), 1);
        assert!(h.directory.cleared().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_runs_on_spawned_task() {
        let h = harness(
            vec![Ok(snapshot(&[(Game::Hsr, &["H1", "H2"])]))],
            RecordingDirectory::new(vec![Subscriber::new("u1", "tok-1")]),
            Some(snapshot(&[(Game::Hsr, &["H1"])])),
        );

        let report = tokio::spawn({
            let cycle = h.cycle.clone();
            async move { cycle.run_cycle().await }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.delivered(), 1);
        assert_eq!(h.delivery.sent()[0].1.body, "1 new code for Honkai: Star Rail");
    }

    #[tokio::test]
    async fn test_dropped_cycle_still_delivers_new_codes() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(snapshot(&[(Game::Genshin, &["A", "B"])])),
            Ok(snapshot(&[(Game::Genshin, &["A", "B"])])),
        ]));
        let delivery = Arc::new(RecordingDelivery::new().delay_for("tok-1", Duration::from_millis(300)));
        let directory = Arc::new(RecordingDirectory::new(vec![Subscriber::new("u1", "tok-1")]));
        let store = create_shared_snapshot_store(SnapshotStore::with_snapshot(snapshot(&[(
            Game::Genshin,
            &["A"],
        )])));
        let dispatcher = Dispatcher::new(delivery.clone(), directory.clone(), DispatchSettings::default());
        let cycle = DetectionCycle::new(source, store, directory, dispatcher, None);

        // Caller gives up while the delivery is in flight
        let abandoned = tokio::time::timeout(Duration::from_millis(50), cycle.run_cycle()).await;
        assert!(abandoned.is_err());
        assert!(delivery.sent().is_empty());

        // The detached dispatch still holds the cycle
        assert!(matches!(cycle.run_cycle().await, Err(CycleError::AlreadyRunning)));

        let next = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match cycle.run_cycle().await {
                    Err(CycleError::AlreadyRunning) => {
                        tokio::time::sleep(Duration::from_millis(10)).await
                    }
                    other => break other,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();

        let sent = delivery.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.body, "1 new code for Genshin Impact");
        assert!(next.new_codes.is_empty());
    }
}
