//! Stage executor
//!
//! The StageExecutor runs one stage for one request:
//! 1. Tell the collaborator which agent roles the stage calls for
//! 2. Call the collaborator under the stage timeout
//! 3. On a transient failure, wait the fixed backoff and call once more
//! 4. Capture the outcome, success or failure, in a [`StageResult`]
//!
//! Nothing escapes as an error: timeouts and collaborator failures become
//! `failed` results with a reason.

use agent_core::context::keys;
use agent_core::{
    AgentRoster, AnalysisCollaborator, AnalysisRequest, CollaboratorError, Context, FailureKind,
    OutputStatus, Stage, StageFailure, StageResult, StageStatus,
};
use agent_stock::StockConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timeout and retry settings for stage calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    /// Upper bound on a single collaborator call
    pub timeout: Duration,
    /// Fixed pause before the retry
    pub retry_backoff: Duration,
    /// Total calls allowed for transient failures, retry included
    pub max_attempts: u32,
}

impl StagePolicy {
    pub fn from_config(config: &StockConfig) -> Self {
        Self {
            timeout: config.stage_timeout,
            retry_backoff: config.retry_backoff,
            ..Self::default()
        }
    }
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry_backoff: Duration::from_secs(2),
            max_attempts: 2,
        }
    }
}

/// Runs single stages against the analysis collaborator
pub struct StageExecutor {
    collaborator: Arc<dyn AnalysisCollaborator>,
    roster: Arc<AgentRoster>,
    policy: StagePolicy,
}

impl StageExecutor {
    /// Create a new stage executor
    pub fn new(
        collaborator: Arc<dyn AnalysisCollaborator>,
        roster: Arc<AgentRoster>,
        policy: StagePolicy,
    ) -> Self {
        Self {
            collaborator,
            roster,
            policy,
        }
    }

    pub fn builder() -> StageExecutorBuilder {
        StageExecutorBuilder::new()
    }

    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    pub fn collaborator(&self) -> &Arc<dyn AnalysisCollaborator> {
        &self.collaborator
    }

    /// Run `stage` for `request`
    ///
    /// On success the payload is recorded in `context` so later stages of the
    /// same run can read it.
    pub async fn run(
        &self,
        stage: Stage,
        request: &AnalysisRequest,
        context: &mut Context,
    ) -> StageResult {
        context.insert(
            keys::AGENT_ROLES,
            serde_json::json!(self.roster.role_names(stage)),
        );

        let started = Instant::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            debug!(ticker = request.ticker(), %stage, attempt = attempts, "running stage");

            let call = self.collaborator.execute(stage, request, context);
            match tokio::time::timeout(self.policy.timeout, call).await {
                Err(_) => {
                    warn!(
                        ticker = request.ticker(),
                        %stage,
                        timeout_ms = self.policy.timeout.as_millis(),
                        "stage timed out"
                    );
                    break StageResult::failed(stage, StageFailure::timeout());
                }
                Ok(Ok(output)) => {
                    let status = match output.status {
                        OutputStatus::Ok => StageStatus::Ok,
                        OutputStatus::Degraded => StageStatus::Degraded,
                    };
                    break StageResult::completed(stage, status, output.payload, output.data_quality);
                }
                Ok(Err(CollaboratorError::Transient(reason)))
                    if attempts < self.policy.max_attempts =>
                {
                    warn!(
                        ticker = request.ticker(),
                        %stage,
                        %reason,
                        backoff_ms = self.policy.retry_backoff.as_millis(),
                        "transient stage failure, retrying"
                    );
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                Ok(Err(err)) => {
                    let kind = if err.is_transient() {
                        FailureKind::Transient
                    } else {
                        FailureKind::Fatal
                    };
                    warn!(ticker = request.ticker(), %stage, %kind, reason = err.reason(), "stage failed");
                    break StageResult::failed(stage, StageFailure::new(kind, err.reason()));
                }
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let result = result.with_attempts(attempts).with_elapsed_ms(elapsed_ms);

        if !result.is_failed() {
            context.record_stage(stage, result.payload.clone());
        }

        info!(
            ticker = request.ticker(),
            %stage,
            status = ?result.status,
            quality = result.data_quality,
            attempts,
            elapsed_ms,
            "stage finished"
        );
        result
    }
}

/// Builder for StageExecutor
pub struct StageExecutorBuilder {
    collaborator: Option<Arc<dyn AnalysisCollaborator>>,
    roster: Arc<AgentRoster>,
    policy: StagePolicy,
}

impl StageExecutorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            collaborator: None,
            roster: Arc::new(AgentRoster::standard()),
            policy: StagePolicy::default(),
        }
    }

    /// Set the analysis collaborator
    pub fn collaborator(mut self, collaborator: Arc<dyn AnalysisCollaborator>) -> Self {
        self.collaborator = Some(collaborator);
        self
    }

    /// Set the agent roster
    pub fn roster(mut self, roster: Arc<AgentRoster>) -> Self {
        self.roster = roster;
        self
    }

    /// Set the full policy
    pub fn policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.policy.retry_backoff = backoff;
        self
    }

    /// Build the executor
    pub fn build(self) -> agent_core::Result<StageExecutor> {
        let collaborator = self.collaborator.ok_or_else(|| {
            agent_core::Error::InitializationFailed("Collaborator not set".to_string())
        })?;

        if self.policy.timeout.is_zero() {
            return Err(agent_core::Error::InitializationFailed(
                "Stage timeout must be greater than 0".to_string(),
            ));
        }

        Ok(StageExecutor::new(collaborator, self.roster, self.policy))
    }
}

impl Default for StageExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
