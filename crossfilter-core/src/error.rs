//! Error types for cross-filter operations

use thiserror::Error;

/// Result type for cross-filter operations
pub type CrossfilterResult<T> = Result<T, CrossfilterError>;

/// Error taxonomy shared by backends, the cube cache and the controller
#[derive(Error, Debug)]
pub enum CrossfilterError {
    /// Invalid dimension or view definition. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A cube diff went negative. Never leaves the cube store.
    #[error("Stale result: {0}")]
    StaleResult(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrossfilterError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a new stale result error
    pub fn stale<S: Into<String>>(message: S) -> Self {
        Self::StaleResult(message.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a new backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend(message.into())
    }

    /// Check if this is a retriable error
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CrossfilterError::Connection(_)
                | CrossfilterError::Timeout { .. }
                | CrossfilterError::Io(_)
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CrossfilterError::Configuration(_) => "configuration",
            CrossfilterError::Connection(_) => "connection",
            CrossfilterError::Timeout { .. } => "timeout",
            CrossfilterError::StaleResult(_) => "stale_result",
            CrossfilterError::InvalidRequest(_) => "invalid_request",
            CrossfilterError::Backend(_) => "backend",
            CrossfilterError::Io(_) => "io",
            CrossfilterError::Json(_) => "json",
        }
    }
}

impl From<reqwest::Error> for CrossfilterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured duration
            CrossfilterError::Timeout { timeout_ms: 0 }
        } else if err.is_connect() || err.is_request() {
            CrossfilterError::Connection(err.to_string())
        } else {
            CrossfilterError::Backend(err.to_string())
        }
    }
}
