//! Error types for orchestration

use crate::flow::{FlowEvent, FlowState};
use agent_stock::BatchSummary;
use thiserror::Error;

/// Orchestration errors
///
/// Stage failures never show up here; they are captured in
/// [`agent_core::StageResult`] and surface as aborted reports.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The flow state machine has no edge for this event
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: FlowState, event: FlowEvent },

    /// A batch was submitted without requests
    #[error("batch contains no requests")]
    EmptyBatch,

    /// Every request in the batch was aborted, rejected or skipped
    #[error("no request in batch {} completed ({} failed, {} skipped)", .0.run_id(), .0.failures().len(), .0.skipped().len())]
    NoSuccessfulAnalyses(Box<BatchSummary>),

    /// Invalid orchestrator setup
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Stock(#[from] agent_stock::StockError),
}

impl WorkflowError {
    /// Partial summary carried by a failed batch
    pub fn summary(&self) -> Option<&BatchSummary> {
        match self {
            Self::NoSuccessfulAnalyses(summary) => Some(summary),
            _ => None,
        }
    }
}

/// Convert WorkflowError to agent_core::Error
impl From<WorkflowError> for agent_core::Error {
    fn from(err: WorkflowError) -> Self {
        agent_core::Error::ProcessingFailed(err.to_string())
    }
}

/// Result type alias for orchestration
pub type Result<T> = std::result::Result<T, WorkflowError>;
