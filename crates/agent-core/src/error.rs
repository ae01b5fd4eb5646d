//! Error types for agent-core

use thiserror::Error;

/// Result type alias for agent-core
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Generic error message
    #[error("{0}")]
    Generic(String),

    /// Request failed validation before any work was attempted
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Roster or other startup configuration is inconsistent
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Processing failed
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Failure raised by an [`AnalysisCollaborator`](crate::AnalysisCollaborator)
///
/// The split matters to the stage executor: transient failures are retried
/// once, fatal failures never are.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Network hiccup, rate limit, or temporary unavailability
    #[error("transient: {0}")]
    Transient(String),

    /// The request can never succeed (unknown ticker, malformed input)
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CollaboratorError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Underlying reason without the classification prefix
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Fatal(reason) => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidRequest("empty ticker".to_string());
        assert_eq!(err.to_string(), "Invalid request: empty ticker");
    }

    #[test]
    fn test_collaborator_error_classification() {
        let transient = CollaboratorError::Transient("rate limited".to_string());
        assert!(transient.is_transient());
        assert_eq!(transient.reason(), "rate limited");
        assert_eq!(transient.to_string(), "transient: rate limited");

        let fatal = CollaboratorError::Fatal("unknown ticker".to_string());
        assert!(!fatal.is_transient());
        assert_eq!(fatal.reason(), "unknown ticker");
    }
}
