use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeForgeError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // State errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported schema version {version} in state file '{path}'")]
    StateVersion { path: String, version: u32 },

    #[error("Subscriber not found: {id}")]
    SubscriberNotFound { id: String },

    // Upstream code source errors
    #[error("Failed to reach codes API: {message}")]
    Transport { message: String },

    #[error("Codes API returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("{message}")]
    Upstream { retcode: i64, message: String },

    #[error("Malformed codes payload: {message}")]
    MalformedPayload { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CodeForgeError {
    /// Message suitable for showing to an API caller
    pub fn user_message(&self) -> String {
        match self {
            // Upstream envelope messages are surfaced verbatim
            CodeForgeError::Upstream { message, .. } => message.clone(),
            CodeForgeError::UpstreamStatus { status } => {
                format!("Codes API is unavailable (HTTP {})", status)
            }
            CodeForgeError::Transport { .. } => "Could not reach the codes API".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for CodeForgeError {
    fn from(err: reqwest::Error) -> Self {
        CodeForgeError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CodeForgeError {
    fn from(err: std::io::Error) -> Self {
        CodeForgeError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CodeForgeError {
    fn from(err: serde_json::Error) -> Self {
        CodeForgeError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodeForgeError>;
