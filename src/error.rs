use thiserror::Error;

/// Main error type for the resilience layer
#[derive(Error, Debug)]
pub enum VigilError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Registration errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Component not found: {0}")]
    NotFound(String),

    // Circuit breaker errors
    #[error("Circuit open for component {component}, retry in {retry_in_ms}ms")]
    CircuitOpen { component: String, retry_in_ms: u64 },

    // Lock discipline errors (soft failure: log, skip the operation)
    #[error("Timed out acquiring {what} lock")]
    LockTimeout { what: &'static str },

    // Component boundary errors
    #[error("Component failure: {component} - {reason}")]
    ComponentFailure { component: String, reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for VigilError
pub type Result<T> = std::result::Result<T, VigilError>;
