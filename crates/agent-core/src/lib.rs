//! Core contracts for the stock analysis orchestrator
//!
//! This crate defines the types shared by every layer of the workspace: what a
//! caller asks for ([`AnalysisRequest`]), the discrete analysis steps
//! ([`Stage`]) and their outcomes ([`StageResult`]), the external
//! [`AnalysisCollaborator`] that performs the actual domain work, the
//! execution [`Context`] threaded through a pipeline, and the typed
//! [`AgentRoster`] that binds agent roles to stages.

pub mod agent;
pub mod collaborator;
pub mod context;
pub mod error;
pub mod request;
pub mod stage;

pub use agent::{AgentProfile, AgentRole, AgentRoster, Capability};
pub use collaborator::{AnalysisCollaborator, CollaboratorHealth, OutputStatus, StageOutput};
pub use context::Context;
pub use error::{CollaboratorError, Error, Result};
pub use request::{AnalysisRequest, Depth};
pub use stage::{FailureKind, Stage, StageFailure, StageResult, StageStatus};
