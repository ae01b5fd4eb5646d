//! The external analysis collaborator contract
//!
//! The orchestrator never performs domain work itself. Every stage is
//! delegated to an [`AnalysisCollaborator`]: an LLM crew, a remote service,
//! or a test double.

use crate::{AnalysisRequest, CollaboratorError, Context, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by the collaborator alongside its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Ok,
    Degraded,
}

/// Successful collaborator output for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub payload: serde_json::Value,
    /// Normalized confidence in `[0, 1]`
    pub data_quality: f64,
    pub status: OutputStatus,
}

impl StageOutput {
    pub fn ok(payload: serde_json::Value, data_quality: f64) -> Self {
        Self {
            payload,
            data_quality,
            status: OutputStatus::Ok,
        }
    }

    pub fn degraded(payload: serde_json::Value, data_quality: f64) -> Self {
        Self {
            payload,
            data_quality,
            status: OutputStatus::Degraded,
        }
    }
}

/// Liveness signal of the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorHealth {
    #[default]
    Healthy,
    /// Reachable but with reduced capacity
    Degraded,
    Unavailable,
}

impl fmt::Display for CollaboratorHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        })
    }
}

/// Performs the domain computation behind each stage
///
/// Implementations may be slow (seconds to minutes) and may fail either
/// transiently or fatally; see [`CollaboratorError`]. The context carries the
/// payloads of earlier stages of the same run.
#[async_trait]
pub trait AnalysisCollaborator: Send + Sync {
    /// Execute one stage for one request
    async fn execute(
        &self,
        stage: Stage,
        request: &AnalysisRequest,
        context: &Context,
    ) -> std::result::Result<StageOutput, CollaboratorError>;

    /// Probe capacity; used to choose between parallel and sequential batches
    async fn health(&self) -> CollaboratorHealth {
        CollaboratorHealth::Healthy
    }

    /// Name used in logs
    fn name(&self) -> &str {
        "collaborator"
    }
}
