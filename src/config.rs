//! Runtime configuration from environment variables.

use std::time::Duration;

use crate::error::{CodeForgeError, Result};
use crate::notify::{DispatchSettings, MessageSettings};

pub const DEFAULT_CODES_API_URL: &str = "https://db.hashblen.com/codes";

/// Service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Codes endpoint polled each cycle
    pub codes_api_url: String,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub delivery_timeout: Duration,
    /// Deliveries in flight at once
    pub dispatch_concurrency: usize,
    /// Directory holding the snapshot and subscriber files
    pub state_path: String,
    /// Push gateway endpoint; notifications are only logged without one
    pub push_gateway_url: Option<String>,
    pub push_gateway_key: Option<String>,
    pub notification_url: String,
    pub notification_icon: Option<String>,
    pub web_enabled: bool,
    pub http_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let message = MessageSettings::default();
        Self {
            codes_api_url: DEFAULT_CODES_API_URL.to_string(),
            poll_interval: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(15),
            delivery_timeout: Duration::from_secs(10),
            dispatch_concurrency: 8,
            state_path: "state".to_string(),
            push_gateway_url: None,
            push_gateway_key: None,
            notification_url: message.url,
            notification_icon: message.icon,
            web_enabled: true,
            http_port: 8080,
        }
    }
}

impl AppConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        Self {
            codes_api_url: non_empty("CODES_API_URL").unwrap_or(defaults.codes_api_url),
            poll_interval: secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            fetch_timeout: secs("FETCH_TIMEOUT_SECS", defaults.fetch_timeout),
            delivery_timeout: secs("DELIVERY_TIMEOUT_SECS", defaults.delivery_timeout),
            dispatch_concurrency: lookup("DISPATCH_CONCURRENCY")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.dispatch_concurrency),
            state_path: non_empty("STATE_PATH").unwrap_or(defaults.state_path),
            push_gateway_url: non_empty("PUSH_GATEWAY_URL"),
            push_gateway_key: non_empty("PUSH_GATEWAY_KEY"),
            notification_url: non_empty("NOTIFICATION_URL").unwrap_or(defaults.notification_url),
            notification_icon: non_empty("NOTIFICATION_ICON").or(defaults.notification_icon),
            web_enabled: lookup("WEB_ENABLED")
                .map(|s| !matches!(s.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.web_enabled),
            http_port: lookup("HTTP_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.http_port),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CodeForgeError::ConfigValidation {
                message: "poll interval must be at least one second".to_string(),
            });
        }
        if self.dispatch_concurrency == 0 {
            return Err(CodeForgeError::ConfigValidation {
                message: "dispatch concurrency must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout.is_zero() || self.delivery_timeout.is_zero() {
            return Err(CodeForgeError::ConfigValidation {
                message: "timeouts must be at least one second".to_string(),
            });
        }
        if !self.codes_api_url.starts_with("http://") && !self.codes_api_url.starts_with("https://") {
            return Err(CodeForgeError::ConfigValidation {
                message: format!("codes API URL '{}' is not an http(s) URL", self.codes_api_url),
            });
        }
        Ok(())
    }

    pub fn snapshot_file(&self) -> String {
        format!("{}/last_known_codes.json", self.state_path)
    }

    pub fn subscribers_file(&self) -> String {
        format!("{}/subscribers.json", self.state_path)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            concurrency: self.dispatch_concurrency,
            delivery_timeout: self.delivery_timeout,
            message: MessageSettings {
                url: self.notification_url.clone(),
                icon: self.notification_icon.clone(),
            },
        }
    }
}
