use thiserror::Error;

/// Top-level error type for Qalabot.
#[derive(Debug, Error)]
pub enum QalaError {
    /// Error from the messaging transport.
    #[error("channel error: {0}")]
    Channel(String),

    /// Backend API call failed (network or application-level rejection).
    #[error("backend error: {0}")]
    Backend(String),

    /// Photo storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
