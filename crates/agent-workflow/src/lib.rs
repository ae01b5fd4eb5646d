//! Orchestration for stock analysis runs
//!
//! - [`executor`]: runs one stage against the collaborator with a timeout and
//!   a single fixed-backoff retry
//! - [`flow`]: the single-target state machine and the adaptive
//!   [`FlowController`]
//! - [`workflow`]: [`AnalysisWorkflow`], one ticker from cache lookup to report
//! - [`batch`]: [`BatchOrchestrator`], many tickers under a worker budget
//! - [`progress`]: shared batch progress counters

pub mod batch;
pub mod error;
pub mod executor;
pub mod flow;
pub mod progress;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-export for convenience
pub use batch::BatchOrchestrator;
pub use error::{Result, WorkflowError};
pub use executor::{StageExecutor, StageExecutorBuilder, StagePolicy};
pub use flow::{
    Flow, FlowController, FlowDecision, FlowEvent, FlowState, stages_for, transition,
};
pub use progress::{BatchProgress, ProgressCallback, ProgressTracker};
pub use workflow::{AnalysisWorkflow, AnalysisWorkflowBuilder};
