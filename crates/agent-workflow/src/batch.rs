//! Batch orchestration
//!
//! A batch probes the collaborator once, lets the [`FlowController`] pick a
//! strategy and dispatches one single-target run per valid request:
//!
//! - sequential: inline on the caller's task, one after another
//! - parallel: every request spawned at once
//! - waves: groups of `worker_budget` spawned together, groups strictly one
//!   after another with a pause in between
//!
//! Cancellation is cooperative. Runs already dispatched finish; nothing new
//! is dispatched once the token fires, and the undispatched requests are
//! reported as skipped.
//!
//! [`FlowController`]: crate::flow::FlowController

use crate::error::{Result, WorkflowError};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::workflow::AnalysisWorkflow;
use agent_core::AnalysisRequest;
use agent_stock::{AnalysisReport, BatchSummary, ExecutionStrategy, ItemOutcome, StockConfig};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs many single-target analyses under a worker budget
pub struct BatchOrchestrator {
    workflow: Arc<AnalysisWorkflow>,
    worker_budget: usize,
    wave_pause: Duration,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(workflow: Arc<AnalysisWorkflow>, config: &StockConfig) -> Self {
        Self {
            workflow,
            worker_budget: config.worker_budget.max(1),
            wave_pause: config.wave_pause,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report a [`BatchProgress`](crate::progress::BatchProgress) snapshot
    /// after every finished request
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_wave_pause(mut self, pause: Duration) -> Self {
        self.wave_pause = pause;
        self
    }

    pub fn worker_budget(&self) -> usize {
        self.worker_budget
    }

    /// Token that stops further dispatch when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analyze `requests` with the configured worker budget
    pub async fn run(&self, requests: Vec<AnalysisRequest>) -> Result<BatchSummary> {
        self.run_with_budget(requests, self.worker_budget).await
    }

    /// Analyze `requests` with at most `worker_budget` concurrent runs
    ///
    /// Succeeds as long as one request finished `Done`; otherwise fails with
    /// [`WorkflowError::NoSuccessfulAnalyses`] carrying the partial summary.
    pub async fn run_with_budget(
        &self,
        requests: Vec<AnalysisRequest>,
        worker_budget: usize,
    ) -> Result<BatchSummary> {
        if requests.is_empty() {
            return Err(WorkflowError::EmptyBatch);
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let total = requests.len();

        let health = self.workflow.collaborator().health().await;
        let strategy = self
            .workflow
            .controller()
            .advise_strategy(total, worker_budget.max(1), health);
        info!(%run_id, total, %strategy, %health, "batch started");

        let tracker = Arc::new(ProgressTracker::new(total, self.progress.clone()));
        let mut outcomes: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();

        let mut pending = Vec::with_capacity(total);
        for (index, request) in requests.iter().enumerate() {
            match request.validate() {
                Ok(()) => pending.push(index),
                Err(e) => {
                    warn!(%run_id, ticker = request.ticker(), error = %e, "request rejected");
                    outcomes[index] = Some(ItemOutcome::Rejected(e.to_string()));
                    tracker.reject_item();
                }
            }
        }

        let mut waves_executed = 0;
        let mut rest = pending.as_slice();
        for size in strategy.plan(pending.len()) {
            if waves_executed > 0 && !self.pause_between_waves(strategy).await {
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let (wave, remaining) = rest.split_at(size);
            rest = remaining;
            waves_executed += 1;
            debug!(%run_id, wave = waves_executed, size, "dispatching wave");

            let finished = match strategy {
                ExecutionStrategy::Sequential => {
                    self.run_inline(wave, &requests, &tracker).await
                }
                ExecutionStrategy::Parallel | ExecutionStrategy::Waves { .. } => {
                    self.run_concurrent(wave, &requests, &tracker).await
                }
            };
            for (index, outcome) in finished {
                outcomes[index] = Some(outcome);
            }
        }

        let cancelled = self.cancel.is_cancelled() && !rest.is_empty();
        if cancelled {
            warn!(%run_id, skipped = rest.len(), "batch cancelled, skipping undispatched requests");
        }

        let items: Vec<(AnalysisRequest, ItemOutcome)> = requests
            .into_iter()
            .zip(outcomes)
            .map(|(request, outcome)| (request, outcome.unwrap_or(ItemOutcome::Skipped)))
            .collect();
        let summary =
            BatchSummary::assemble(run_id, strategy, started_at, waves_executed, cancelled, items);

        let progress = tracker.snapshot();
        info!(
            run_id = summary.run_id(),
            succeeded = summary.succeeded(),
            failed = summary.failures().len(),
            skipped = summary.skipped().len(),
            waves = waves_executed,
            percentage = progress.percentage,
            "batch finished"
        );

        if summary.succeeded() == 0 {
            return Err(WorkflowError::NoSuccessfulAnalyses(Box::new(summary)));
        }
        Ok(summary)
    }

    /// Wait out the wave pause; false when cancelled meanwhile
    async fn pause_between_waves(&self, strategy: ExecutionStrategy) -> bool {
        if !matches!(strategy, ExecutionStrategy::Waves { .. }) || self.wave_pause.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(self.wave_pause) => true,
        }
    }

    async fn run_inline(
        &self,
        wave: &[usize],
        requests: &[AnalysisRequest],
        tracker: &ProgressTracker,
    ) -> Vec<(usize, ItemOutcome)> {
        let mut finished = Vec::with_capacity(wave.len());
        for &index in wave {
            tracker.start_item();
            let report = self.workflow.run(&requests[index]).await;
            tracker.finish_item(report.is_done());
            finished.push((index, ItemOutcome::Finished(report)));
        }
        finished
    }

    async fn run_concurrent(
        &self,
        wave: &[usize],
        requests: &[AnalysisRequest],
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<(usize, ItemOutcome)> {
        let handles: Vec<_> = wave
            .iter()
            .map(|&index| {
                let workflow = Arc::clone(&self.workflow);
                let tracker = Arc::clone(tracker);
                let request = requests[index].clone();
                tracker.start_item();
                tokio::spawn(async move {
                    let report: AnalysisReport = workflow.run(&request).await;
                    tracker.finish_item(report.is_done());
                    report
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(wave)
            .map(|(joined, &index)| {
                let outcome = match joined {
                    Ok(report) => ItemOutcome::Finished(report),
                    Err(e) => {
                        error!(ticker = requests[index].ticker(), error = %e, "analysis task failed");
                        tracker.finish_item(false);
                        ItemOutcome::Rejected(format!("analysis task failed: {e}"))
                    }
                };
                (index, outcome)
            })
            .collect()
    }
}
