use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::snapshot_store::write_atomic;
use crate::codes::Game;
use crate::error::{CodeForgeError, Result};

/// Read/write access the notification path needs to subscriber records
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// All known subscribers
    async fn list(&self) -> Result<Vec<Subscriber>>;

    /// Forget a subscriber's delivery token after the push service rejected it.
    ///
    /// `token` is the rejected one; a token the subscriber registered since
    /// then is kept.
    async fn clear_token(&self, subscriber_id: &str, token: &str) -> Result<()>;
}

/// Notification preferences chosen by a subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    /// Wants to hear about new codes at all
    #[serde(default)]
    pub new_codes: bool,

    /// Only for games in `favorite_games`
    #[serde(default)]
    pub favorites_only: bool,
}

/// A notification recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: String,

    /// Push token; cleared when the push service reports it invalid
    #[serde(
        default,
        alias = "fcmToken",
        alias = "delivery_token",
        skip_serializing_if = "Option::is_none"
    )]
    pub delivery_token: Option<String>,

    #[serde(default, alias = "favorite_games")]
    pub favorite_games: BTreeSet<Game>,

    #[serde(default)]
    pub notifications: NotificationPreferences,

    /// Last change (Unix timestamp)
    #[serde(default, alias = "updated_at")]
    pub updated_at: u64,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delivery_token: Some(token.into()),
            favorite_games: BTreeSet::new(),
            notifications: NotificationPreferences {
                new_codes: true,
                favorites_only: false,
            },
            updated_at: current_timestamp(),
        }
    }

    pub fn with_favorites(mut self, games: impl IntoIterator<Item = Game>) -> Self {
        self.favorite_games = games.into_iter().collect();
        self
    }

    pub fn favorites_only(mut self, enabled: bool) -> Self {
        self.notifications.favorites_only = enabled;
        self
    }

    pub fn notifications_enabled(mut self, enabled: bool) -> Self {
        self.notifications.new_codes = enabled;
        self
    }

    /// Token usable for delivery, if any
    pub fn token(&self) -> Option<&str> {
        self.delivery_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Persisted set of subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberDatabase {
    /// Schema version for migrations
    pub version: u32,

    /// Last update timestamp
    #[serde(alias = "last_updated")]
    pub last_updated: u64,

    /// Subscriber id -> subscriber
    pub subscribers: BTreeMap<String, Subscriber>,
}

impl Default for SubscriberDatabase {
    fn default() -> Self {
        Self {
            version: 1,
            last_updated: current_timestamp(),
            subscribers: BTreeMap::new(),
        }
    }
}

/// Subscriber directory backed by a JSON file
pub struct JsonSubscriberDirectory {
    /// File the database is saved to after every change; `None` keeps it in memory
    path: Option<String>,
    db: RwLock<SubscriberDatabase>,
}

impl JsonSubscriberDirectory {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            db: RwLock::new(SubscriberDatabase::default()),
        }
    }

    /// Load from a JSON file, or start empty if it does not exist
    pub async fn load(path: &str) -> Result<Self> {
        let db = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str::<SubscriberDatabase>(&content).map_err(|e| {
                CodeForgeError::StateParse {
                    path: path.to_string(),
                    source: e,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SubscriberDatabase::default(),
            Err(e) => {
                return Err(CodeForgeError::StateLoad {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        info!("Loaded {} subscribers from {}", db.subscribers.len(), path);

        Ok(Self {
            path: Some(path.to_string()),
            db: RwLock::new(db),
        })
    }

    async fn persist(&self, db: &SubscriberDatabase) -> Result<()> {
        match &self.path {
            Some(path) => {
                let content = serde_json::to_string_pretty(db)?;
                write_atomic(path, &content).await
            }
            None => Ok(()),
        }
    }

    /// Add or update a subscriber (opt-in or preference change)
    pub async fn upsert(&self, mut subscriber: Subscriber) -> Result<Subscriber> {
        subscriber.updated_at = current_timestamp();

        let mut db = self.db.write().await;
        db.subscribers
            .insert(subscriber.id.clone(), subscriber.clone());
        db.last_updated = current_timestamp();
        self.persist(&db).await?;

        debug!("Upserted subscriber {}", subscriber.id);
        Ok(subscriber)
    }

    /// Remove a subscriber; returns whether it existed
    pub async fn remove(&self, subscriber_id: &str) -> Result<bool> {
        let mut db = self.db.write().await;
        let existed = db.subscribers.remove(subscriber_id).is_some();
        if existed {
            db.last_updated = current_timestamp();
            self.persist(&db).await?;
            info!("Removed subscriber {}", subscriber_id);
        }
        Ok(existed)
    }

    pub async fn get(&self, subscriber_id: &str) -> Option<Subscriber> {
        self.db.read().await.subscribers.get(subscriber_id).cloned()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.db.read().await.subscribers.len()
    }
}

#[async_trait]
impl SubscriberDirectory for JsonSubscriberDirectory {
    async fn list(&self) -> Result<Vec<Subscriber>> {
        Ok(self.db.read().await.subscribers.values().cloned().collect())
    }

    async fn clear_token(&self, subscriber_id: &str, token: &str) -> Result<()> {
        let mut db = self.db.write().await;
        let subscriber = db.subscribers.get_mut(subscriber_id).ok_or_else(|| {
            CodeForgeError::SubscriberNotFound {
                id: subscriber_id.to_string(),
            }
        })?;

        if subscriber.token() != Some(token) {
            debug!(
                "Subscriber {} registered a new token, keeping it",
                subscriber_id
            );
            return Ok(());
        }

        subscriber.delivery_token = None;
        subscriber.updated_at = current_timestamp();
        db.last_updated = current_timestamp();
        self.persist(&db).await?;

        info!("Cleared delivery token for subscriber {}", subscriber_id);
        Ok(())
    }
}

/// Shared subscriber directory type
pub type SharedSubscriberDirectory = Arc<JsonSubscriberDirectory>;

pub fn create_shared_subscriber_directory(
    directory: JsonSubscriberDirectory,
) -> SharedSubscriberDirectory {
    Arc::new(directory)
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
