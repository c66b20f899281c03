use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::delivery::{DeliveryError, FailureKind, PushDelivery};
use super::message::{compose, MessageSettings, NotificationMessage};
use crate::codes::{Game, NewCodes};
use crate::state::{Subscriber, SubscriberDirectory};

/// Dispatch tuning
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Deliveries in flight at once
    pub concurrency: usize,
    pub delivery_timeout: Duration,
    pub message: MessageSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            delivery_timeout: Duration::from_secs(10),
            message: MessageSettings::default(),
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryResult {
    Delivered,
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub subscriber_id: String,
    #[serde(flatten)]
    pub result: DeliveryResult,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result == DeliveryResult::Delivered
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.result {
            DeliveryResult::Delivered => None,
            DeliveryResult::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Games from `new_codes` this subscriber wants to hear about, in canonical order
pub fn eligible_games(new_codes: &NewCodes, subscriber: &Subscriber) -> Vec<Game> {
    new_codes
        .games()
        .filter(|game| {
            !subscriber.notifications.favorites_only || subscriber.favorite_games.contains(game)
        })
        .collect()
}

/// One message bound for one token
struct PlannedDelivery {
    subscriber_id: String,
    token: String,
    message: NotificationMessage,
}

/// Fans one detection cycle's new codes out to subscribers
pub struct Dispatcher {
    delivery: Arc<dyn PushDelivery>,
    directory: Arc<dyn SubscriberDirectory>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        delivery: Arc<dyn PushDelivery>,
        directory: Arc<dyn SubscriberDirectory>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            delivery,
            directory,
            settings,
        }
    }

    /// Notify every eligible subscriber once.
    ///
    /// Returns an outcome per subscriber a delivery was attempted for, in the
    /// order of `subscribers`. One subscriber's failure never stops the rest.
    pub async fn dispatch(
        &self,
        new_codes: &NewCodes,
        subscribers: &[Subscriber],
    ) -> Vec<DeliveryOutcome> {
        if new_codes.is_empty() {
            return Vec::new();
        }

        let planned: Vec<PlannedDelivery> = subscribers
            .iter()
            .filter_map(|subscriber| self.plan(new_codes, subscriber))
            .collect();

        if planned.is_empty() {
            info!("No subscribers to notify for {} new codes", new_codes.total());
            return Vec::new();
        }

        info!(
            "Notifying {} of {} subscribers about {} new codes",
            planned.len(),
            subscribers.len(),
            new_codes.total()
        );

        stream::iter(planned)
            .map(|planned| async move { self.deliver(planned).await })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    fn plan(&self, new_codes: &NewCodes, subscriber: &Subscriber) -> Option<PlannedDelivery> {
        if !subscriber.notifications.new_codes {
            return None;
        }

        let Some(token) = subscriber.token() else {
            debug!("Subscriber {} has no delivery token, skipping", subscriber.id);
            return None;
        };

        let games = eligible_games(new_codes, subscriber);
        if games.is_empty() {
            debug!("No favorite games with new codes for subscriber {}", subscriber.id);
            return None;
        }

        Some(PlannedDelivery {
            subscriber_id: subscriber.id.clone(),
            token: token.to_string(),
            message: compose(new_codes, &games, &self.settings.message),
        })
    }

    async fn deliver(&self, planned: PlannedDelivery) -> DeliveryOutcome {
        let PlannedDelivery {
            subscriber_id,
            token,
            message,
        } = planned;

        let sent = tokio::time::timeout(
            self.settings.delivery_timeout,
            self.delivery.send(&token, &message),
        )
        .await
        .unwrap_or(Err(DeliveryError::Timeout));

        let result = match sent {
            Ok(()) => {
                info!("Notification sent to subscriber {}", subscriber_id);
                DeliveryResult::Delivered
            }
            Err(e) => {
                error!("Failed to send notification to subscriber {}: {}", subscriber_id, e);

                if e.kind() == FailureKind::InvalidToken {
                    if let Err(clear_err) = self.directory.clear_token(&subscriber_id, &token).await {
                        warn!(
                            "Could not clear invalid token for subscriber {}: {}",
                            subscriber_id, clear_err
                        );
                    }
                }

                DeliveryResult::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };

        DeliveryOutcome {
            subscriber_id,
            result,
        }
    }
}
