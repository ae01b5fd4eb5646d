//! Error types for stock analysis services

use thiserror::Error;

/// Stock analysis specific errors
#[derive(Debug, Error)]
pub enum StockError {
    /// Cache backend could not be read or written; callers treat this as a miss
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Report rendering failed
    #[error("Render error: {0}")]
    RenderError(String),

    /// Collaborator endpoint returned something unusable
    #[error("Collaborator error: {0}")]
    CollaboratorError(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Template error
    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for stock operations
pub type Result<T> = std::result::Result<T, StockError>;

/// Convert StockError to agent_core::Error
impl From<StockError> for agent_core::Error {
    fn from(err: StockError) -> Self {
        agent_core::Error::ProcessingFailed(err.to_string())
    }
}

/// Convert agent_core::Error to StockError
impl From<agent_core::Error> for StockError {
    fn from(err: agent_core::Error) -> Self {
        StockError::Other(err.to_string())
    }
}
