//! In-memory collaborators for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::codes::Snapshot;
use crate::error::{CodeForgeError, Result};
use crate::fetch::CodeSource;
use crate::notify::delivery::DeliveryError;
use crate::notify::message::NotificationMessage;
use crate::notify::PushDelivery;
use crate::state::{Subscriber, SubscriberDirectory};

/// Records every send; fails or stalls for configured tokens
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, NotificationMessage)>>,
    failures: HashMap<String, DeliveryError>,
    delays: HashMap<String, Duration>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(mut self, token: &str, error: DeliveryError) -> Self {
        self.failures.insert(token.to_string(), error);
        self
    }

    pub fn delay_for(mut self, token: &str, delay: Duration) -> Self {
        self.delays.insert(token.to_string(), delay);
        self
    }

    pub fn sent(&self) -> Vec<(String, NotificationMessage)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PushDelivery for RecordingDelivery {
    async fn send(&self, token: &str, message: &NotificationMessage) -> std::result::Result<(), DeliveryError> {
        if let Some(delay) = self.delays.get(token) {
            tokio::time::sleep(*delay).await;
        }
        self.sent.lock().push((token.to_string(), message.clone()));
        match self.failures.get(token) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Fixed subscriber list that records `clear_token` calls
pub struct RecordingDirectory {
    subscribers: Vec<Subscriber>,
    cleared: Mutex<Vec<(String, String)>>,
    fail_list: bool,
    fail_clear: bool,
}

impl RecordingDirectory {
    pub fn new(subscribers: Vec<Subscriber>) -> Self {
        Self {
            subscribers,
            cleared: Mutex::new(Vec::new()),
            fail_list: false,
            fail_clear: false,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_clear(mut self) -> Self {
        self.fail_clear = true;
        self
    }

    /// `(subscriber id, token)` pairs passed to `clear_token`
    pub fn cleared(&self) -> Vec<(String, String)> {
        self.cleared.lock().clone()
    }
}

#[async_trait]
impl SubscriberDirectory for RecordingDirectory {
    async fn list(&self) -> Result<Vec<Subscriber>> {
        if self.fail_list {
            return Err(CodeForgeError::Internal {
                message: "directory offline".to_string(),
            });
        }
        Ok(self.subscribers.clone())
    }

    async fn clear_token(&self, subscriber_id: &str, token: &str) -> Result<()> {
        self.cleared
            .lock()
            .push((subscriber_id.to_string(), token.to_string()));
        if self.fail_clear {
            return Err(CodeForgeError::Internal {
                message: "directory offline".to_string(),
            });
        }
        Ok(())
    }
}

/// Serves queued fetch results in order
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Snapshot>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<Snapshot>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeSource for ScriptedSource {
    async fn fetch(&self) -> Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Err(CodeForgeError::Transport {
                    message: "no scripted response left".to_string(),
                })
            })
    }
}
