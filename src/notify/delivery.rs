//! Hand-off to the external push service.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use super::message::NotificationMessage;

/// Push-service error codes meaning the token was unregistered
const UNREGISTERED_CODES: [&str; 3] = [
    "UNREGISTERED",
    "messaging/registration-token-not-registered",
    "NotRegistered",
];

/// Category of a failed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The token is no longer valid and should be forgotten
    InvalidToken,
    Timeout,
    Rejected,
    Transport,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery token is no longer valid")]
    InvalidToken,

    #[error("push service timed out")]
    Timeout,

    #[error("push service rejected the message (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("push service unreachable: {message}")]
    Transport { message: String },
}

impl DeliveryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DeliveryError::InvalidToken => FailureKind::InvalidToken,
            DeliveryError::Timeout => FailureKind::Timeout,
            DeliveryError::Rejected { .. } => FailureKind::Rejected,
            DeliveryError::Transport { .. } => FailureKind::Transport,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Delivers one notification to one token
#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn send(&self, token: &str, message: &NotificationMessage) -> Result<(), DeliveryError>;
}

/// Posts notifications to an HTTP push gateway
pub struct HttpPushGateway {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpPushGateway {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

/// Request body understood by the gateway
pub fn gateway_payload(token: &str, message: &NotificationMessage) -> Value {
    json!({
        "token": token,
        "notification": message,
        "data": message.data,
        "webpush": {
            "fcm_options": { "link": message.data.url }
        }
    })
}

/// Map a non-2xx gateway response to a delivery error
pub fn classify_rejection(status: u16, body: &str) -> DeliveryError {
    if status == 404 || status == 410 {
        return DeliveryError::InvalidToken;
    }

    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let unregistered = parsed
        .as_ref()
        .map(|value| {
            [
                value.pointer("/error/code"),
                value.pointer("/error/status"),
                value.pointer("/error/details/0/errorCode"),
                value.pointer("/code"),
            ]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .any(|code| UNREGISTERED_CODES.contains(&code))
        })
        .unwrap_or(false);

    if unregistered {
        DeliveryError::InvalidToken
    } else {
        DeliveryError::Rejected {
            status,
            message: body.chars().take(200).collect(),
        }
    }
}

#[async_trait]
impl PushDelivery for HttpPushGateway {
    async fn send(&self, token: &str, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&gateway_payload(token, message));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_rejection(status.as_u16(), &body))
    }
}

/// Used when no push gateway is configured
pub struct LogDelivery;

#[async_trait]
impl PushDelivery for LogDelivery {
    async fn send(&self, token: &str, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let tail: String = token
            .chars()
            .skip(token.chars().count().saturating_sub(6))
            .collect();
        info!(
            "[no push gateway] would notify token …{}: {} | {} (games: {})",
            tail, message.title, message.body, message.data.games
        );
        Ok(())
    }
}
