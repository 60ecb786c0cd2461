//! Error types for chatloop
//!
//! Centralized error handling using thiserror. The variants follow the
//! failure classes of a conversation turn: transport problems talking to a
//! provider end the turn, tool-level problems are folded back into the
//! conversation, configuration problems are reported before streaming starts.

use std::time::Duration;

use thiserror::Error;

/// All error types that can occur in chatloop
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network failure talking to a provider
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider answered with a non-success HTTP status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Provider answered 429
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Provider sent an error frame in the middle of a stream
    #[error("Provider stream error: {0}")]
    ProviderStream(String),

    /// No usable provider or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Tunnel credential or URL rejected by the security checks
    #[error("Security check failed: {0}")]
    Security(String),

    /// Interaction log or memory store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether the error comes from talking to a provider.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(_) | ChatError::Api { .. } | ChatError::RateLimited { .. } | ChatError::ProviderStream(_)
        )
    }

    /// Text that is safe to show the caller. Provider bodies stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Transport(_) => "Provider connection failed".to_string(),
            ChatError::Api { .. } => "API error".to_string(),
            ChatError::RateLimited { .. } => "Rate limited by provider".to_string(),
            ChatError::ProviderStream(message) => message.clone(),
            ChatError::Config(message) | ChatError::InvalidRequest(message) => message.clone(),
            ChatError::Security(_) => "Provider rejected by security policy".to_string(),
            ChatError::Storage(_) | ChatError::Io(_) | ChatError::Json(_) => "Internal server error".to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// Result type alias for chatloop operations
pub type Result<T> = std::result::Result<T, ChatError>;
