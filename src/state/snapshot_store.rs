use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::codes::Snapshot;
use crate::error::{CodeForgeError, Result};

const SCHEMA_VERSION: u32 = 1;

/// On-disk form of the last known snapshot
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    snapshot: Option<Snapshot>,
}

/// Holds the current snapshot. Replacement swaps the whole `Arc`, so readers
/// always see either the previous or the next snapshot in full.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Current snapshot, or `None` if nothing was ever recorded
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Make `snapshot` current and return the one it superseded
    pub fn replace(&self, snapshot: Snapshot) -> Option<Arc<Snapshot>> {
        let next = Arc::new(snapshot);
        self.current.write().replace(next)
    }

    /// Load from a JSON file; a missing file yields an empty store
    pub async fn load(path: &str) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let persisted: PersistedSnapshot =
                    serde_json::from_str(&content).map_err(|e| CodeForgeError::StateParse {
                        path: path.to_string(),
                        source: e,
                    })?;

                if persisted.version != SCHEMA_VERSION {
                    return Err(CodeForgeError::StateVersion {
                        path: path.to_string(),
                        version: persisted.version,
                    });
                }

                if let Some(snapshot) = &persisted.snapshot {
                    info!(
                        "Loaded last known snapshot from {} ({} codes, fetched {})",
                        path,
                        snapshot.total_codes(),
                        snapshot.fetched_at.to_rfc3339()
                    );
                }

                Ok(Self {
                    current: RwLock::new(persisted.snapshot.map(Arc::new)),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(CodeForgeError::StateLoad {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    /// Save the current snapshot to a JSON file atomically
    pub async fn save(&self, path: &str) -> Result<()> {
        let persisted = PersistedSnapshot {
            version: SCHEMA_VERSION,
            snapshot: self.get().map(|s| (*s).clone()),
        };
        let content = serde_json::to_string_pretty(&persisted)?;
        write_atomic(path, &content).await
    }
}

/// Write to a temp file first, then rename over the target
pub(crate) async fn write_atomic(path: &str, content: &str) -> Result<()> {
    let temp_path = format!("{}.tmp", path);
    tokio::fs::write(&temp_path, content)
        .await
        .map_err(|e| CodeForgeError::StateSave {
            path: path.to_string(),
            source: e,
        })?;

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| CodeForgeError::StateSave {
            path: path.to_string(),
            source: e,
        })
}

pub type SharedSnapshotStore = Arc<SnapshotStore>;

pub fn create_shared_snapshot_store(store: SnapshotStore) -> SharedSnapshotStore {
    Arc::new(store)
}
