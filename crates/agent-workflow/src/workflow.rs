//! Single-target orchestration
//!
//! An [`AnalysisWorkflow`] drives one request through the [`Flow`] state
//! machine: cache lookup, data collection, analysis (with at most one
//! deepening round), decision synthesis. Stages run strictly one after
//! another and each sees the payloads of the stages before it.

use crate::error::{Result, WorkflowError};
use crate::executor::{StageExecutor, StagePolicy};
use crate::flow::{Flow, FlowController, FlowDecision, FlowEvent, FlowState, stages_for};
use agent_core::context::keys;
use agent_core::{AgentRoster, AnalysisCollaborator, AnalysisRequest, Context, StageResult};
use agent_stock::{AnalysisObserver, AnalysisReport, CacheKey, CacheStore, StockConfig};
use serde_json::json;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs the stage pipeline for one ticker
///
/// # Example
///
/// ```rust,ignore
/// use agent_workflow::AnalysisWorkflow;
/// use agent_stock::{HttpCollaborator, MemoryCache, StockConfig};
/// use std::sync::Arc;
///
/// let config = StockConfig::default();
/// let workflow = AnalysisWorkflow::builder()
///     .collaborator(Arc::new(HttpCollaborator::new("http://localhost:8080", None)?))
///     .cache(Arc::new(MemoryCache::new()))
///     .config(config)
///     .build()?;
///
/// let report = workflow.run(&AnalysisRequest::new("Apple Inc.", "AAPL")).await;
/// println!("{}: {}", report.ticker(), report.rating());
/// ```
pub struct AnalysisWorkflow {
    executor: StageExecutor,
    controller: FlowController,
    cache: Option<Arc<dyn CacheStore>>,
    cache_ttl: Duration,
    observers: Vec<Arc<dyn AnalysisObserver>>,
}

impl AnalysisWorkflow {
    pub fn builder() -> AnalysisWorkflowBuilder {
        AnalysisWorkflowBuilder::new()
    }

    pub fn controller(&self) -> &FlowController {
        &self.controller
    }

    pub fn collaborator(&self) -> &Arc<dyn AnalysisCollaborator> {
        self.executor.collaborator()
    }

    /// Analyze `request` to a terminal state
    ///
    /// Never fails: an invalid request or a fatal stage produces an aborted
    /// report with a reason. Observers see every report, cached ones included.
    pub async fn run(&self, request: &AnalysisRequest) -> AnalysisReport {
        let mut flow = Flow::new();
        let report = match self.drive(&mut flow, request).await {
            Ok(report) => report,
            Err(e) => {
                warn!(ticker = request.ticker(), error = %e, "flow left the state machine");
                AnalysisReport::aborted(request.clone(), Vec::new(), e.to_string(), flow.deepened())
            }
        };

        info!(
            ticker = report.ticker(),
            outcome = %report.outcome(),
            rating = %report.rating(),
            cached = report.from_cache(),
            path = ?flow.trail(),
            "analysis finished"
        );

        self.notify_observers(&report);
        report
    }

    /// A panicking observer is logged and skipped; the report stands.
    fn notify_observers(&self, report: &AnalysisReport) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_report(report))).is_err() {
                error!(
                    ticker = report.ticker(),
                    outcome = %report.outcome(),
                    "report observer panicked"
                );
            }
        }
    }

    async fn drive(&self, flow: &mut Flow, request: &AnalysisRequest) -> Result<AnalysisReport> {
        if let Err(e) = request.validate() {
            flow.apply(FlowEvent::Abort)?;
            return Ok(AnalysisReport::aborted(
                request.clone(),
                Vec::new(),
                e.to_string(),
                false,
            ));
        }

        let key = CacheKey::for_request(request);
        if let Some(report) = self.lookup(&key).await {
            flow.apply(FlowEvent::CacheHit)?;
            return Ok(report);
        }
        flow.apply(FlowEvent::CacheMiss)?;

        let mut context = Context::for_run();
        context.insert(keys::DEPTH, json!(request.depth()));
        context.insert(keys::DEEPENED, json!(false));
        let mut results: Vec<StageResult> = Vec::new();

        while !flow.state().is_terminal() {
            let state = flow.state();
            let phase_start = results.len();

            for &stage in stages_for(state, flow.deepened()) {
                let result = self.executor.run(stage, request, &mut context).await;
                let fatal = result.is_fatal();
                results.push(result);
                if fatal {
                    break;
                }
            }

            let phase = &results[phase_start..];
            let decision = match state {
                FlowState::Collecting => phase
                    .last()
                    .map_or(FlowDecision::Abort, |r| self.controller.assess_collection(r)),
                FlowState::Analyzing => self.controller.assess_analysis(&results, flow.deepened()),
                FlowState::Deciding => phase
                    .last()
                    .map_or(FlowDecision::Abort, |r| self.controller.assess_decision(r)),
                FlowState::Pending | FlowState::Done | FlowState::Aborted => {
                    return Err(WorkflowError::InvalidTransition {
                        from: state,
                        event: FlowEvent::Proceed,
                    });
                }
            };

            if decision == FlowDecision::DeepenOnce {
                info!(
                    ticker = request.ticker(),
                    quality = self.controller.aggregate_quality(&results),
                    floor = self.controller.quality_floor(),
                    "data quality below floor, deepening analysis"
                );
                context.insert(keys::DEEPENED, json!(true));
            }

            let next = flow.apply(decision.into())?;
            debug!(ticker = request.ticker(), from = %state, to = %next, "flow transition");

            if next == FlowState::Aborted {
                let reason = abort_reason(phase);
                return Ok(AnalysisReport::aborted(
                    request.clone(),
                    results,
                    reason,
                    flow.deepened(),
                ));
            }
        }

        let quality = self.controller.aggregate_quality(&results);
        let report = AnalysisReport::completed(request.clone(), results, quality, flow.deepened());
        self.store(key, &report).await;
        Ok(report)
    }

    /// Cached report for `key`; cache failures read as a miss
    async fn lookup(&self, key: &CacheKey) -> Option<AnalysisReport> {
        let cache = self.cache.as_ref()?;

        let payload = match cache.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(%key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "cache read failed, analysing uncached");
                return None;
            }
        };

        match serde_json::from_value::<AnalysisReport>(payload) {
            Ok(report) if report.is_done() => {
                info!(%key, "cache hit");
                Some(report.into_cached())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(%key, error = %e, "discarding unreadable cached report");
                None
            }
        }
    }

    /// Write a completed report under its request key
    async fn store(&self, key: CacheKey, report: &AnalysisReport) {
        let Some(cache) = &self.cache else {
            return;
        };

        let seq = cache.reserve_seq();
        let payload = match serde_json::to_value(report) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%key, error = %e, "report not serializable, skipping cache write");
                return;
            }
        };

        match cache.commit(key.clone(), payload, self.cache_ttl, seq).await {
            Ok(true) => debug!(%key, seq, "report cached"),
            Ok(false) => debug!(%key, seq, "newer report already cached"),
            Err(e) => warn!(%key, error = %e, "cache write failed"),
        }
    }
}

/// Reason carried by an aborted report, from the phase that stopped the run
fn abort_reason(phase: &[StageResult]) -> String {
    phase
        .iter()
        .find(|r| r.is_fatal())
        .or_else(|| phase.iter().find(|r| r.is_failed()))
        .and_then(|r| r.failure.as_ref().map(|f| format!("{}: {f}", r.stage)))
        .unwrap_or_else(|| "stage produced no result".to_string())
}

/// Builder for AnalysisWorkflow
pub struct AnalysisWorkflowBuilder {
    collaborator: Option<Arc<dyn AnalysisCollaborator>>,
    roster: Option<Arc<AgentRoster>>,
    cache: Option<Arc<dyn CacheStore>>,
    config: StockConfig,
    observers: Vec<Arc<dyn AnalysisObserver>>,
}

impl AnalysisWorkflowBuilder {
    pub fn new() -> Self {
        Self {
            collaborator: None,
            roster: None,
            cache: None,
            config: StockConfig::default(),
            observers: Vec::new(),
        }
    }

    /// Set the analysis collaborator (required)
    pub fn collaborator(mut self, collaborator: Arc<dyn AnalysisCollaborator>) -> Self {
        self.collaborator = Some(collaborator);
        self
    }

    pub fn roster(mut self, roster: Arc<AgentRoster>) -> Self {
        self.roster = Some(roster);
        self
    }

    /// Set the report cache; without one every run is analysed afresh
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(mut self, config: StockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AnalysisObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<AnalysisWorkflow> {
        self.config.validate()?;
        let collaborator = self
            .collaborator
            .ok_or_else(|| WorkflowError::Config("collaborator is required".to_string()))?;
        let roster = self
            .roster
            .unwrap_or_else(|| Arc::new(AgentRoster::standard()));

        let cache = if self.config.cache_enabled {
            self.cache
        } else {
            None
        };

        Ok(AnalysisWorkflow {
            executor: StageExecutor::new(
                collaborator,
                roster,
                StagePolicy::from_config(&self.config),
            ),
            controller: FlowController::from_config(&self.config),
            cache,
            cache_ttl: self.config.cache_ttl,
            observers: self.observers,
        })
    }
}

impl Default for AnalysisWorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
