//! Codes API client.
//!
//! The API answers with `{ "<game>": [records...], ... }`. Some deployments
//! wrap the same map in an envelope carrying `retcode` and `message`, where a
//! non-zero `retcode` is an upstream error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::codes::{CodeRecord, Game, Snapshot};
use crate::error::{CodeForgeError, Result};

/// Envelope fields that are never game keys
const ENVELOPE_FIELDS: [&str; 2] = ["retcode", "message"];

/// Where snapshots come from
#[async_trait]
pub trait CodeSource: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot>;
}

/// Fetches snapshots over HTTP
pub struct HttpCodeSource {
    url: String,
    client: reqwest::Client,
    clock: SharedClock,
}

impl HttpCodeSource {
    pub fn new(url: impl Into<String>, timeout: Duration, clock: SharedClock) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("codeforge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
            clock,
        })
    }
}

#[async_trait]
impl CodeSource for HttpCodeSource {
    async fn fetch(&self) -> Result<Snapshot> {
        debug!("Fetching codes from {}", self.url);

        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CodeForgeError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CodeForgeError::MalformedPayload {
                message: e.to_string(),
            })?;

        parse_payload(body, self.clock.now())
    }
}

/// Turn a codes API response body into a snapshot
pub fn parse_payload(body: Value, fetched_at: DateTime<Utc>) -> Result<Snapshot> {
    let Value::Object(fields) = body else {
        return Err(CodeForgeError::MalformedPayload {
            message: "expected a JSON object at the top level".to_string(),
        });
    };

    if let Some(retcode) = fields.get("retcode") {
        let retcode = retcode
            .as_i64()
            .ok_or_else(|| CodeForgeError::MalformedPayload {
                message: format!("retcode is not an integer: {}", retcode),
            })?;

        if retcode != 0 {
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Codes API error (retcode {})", retcode));
            warn!("Codes API returned retcode {}: {}", retcode, message);
            return Err(CodeForgeError::Upstream { retcode, message });
        }
    }

    let mut games = BTreeMap::new();
    for (key, value) in fields {
        if ENVELOPE_FIELDS.contains(&key.as_str()) {
            continue;
        }

        let Some(game) = Game::from_key(&key) else {
            debug!("Ignoring unknown game key '{}'", key);
            continue;
        };

        if value.is_null() {
            continue;
        }

        let codes: Vec<CodeRecord> =
            serde_json::from_value(value).map_err(|e| CodeForgeError::MalformedPayload {
                message: format!("invalid code list for {}: {}", game, e),
            })?;
        games.insert(game, codes);
    }

    Ok(Snapshot::new(games, fetched_at))
}
