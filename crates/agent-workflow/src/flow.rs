//! Adaptive flow control
//!
//! The single-target run is an explicit state machine:
//!
//! ```text
//! Pending ──miss──▶ Collecting ──▶ Analyzing ──▶ Deciding ──▶ Done
//!    │                  │           │  ▲  │           │
//!    └──hit──▶ Done     │           └──┘  │           │
//!                       │          deepen │           │
//!                       └──────────────▶ Aborted ◀────┘
//! ```
//!
//! [`transition`] is a pure lookup in a dispatch table. [`FlowController`]
//! turns stage results and load signals into decisions; it performs no I/O.

use crate::error::{Result, WorkflowError};
use agent_core::{CollaboratorHealth, Stage, StageResult, StageStatus};
use agent_stock::{ExecutionStrategy, StockConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one single-target run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Pending,
    Collecting,
    Analyzing,
    Deciding,
    Done,
    Aborted,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Collecting => "collecting",
            Self::Analyzing => "analyzing",
            Self::Deciding => "deciding",
            Self::Done => "done",
            Self::Aborted => "aborted",
        })
    }
}

/// Input driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    CacheHit,
    CacheMiss,
    /// The current phase finished without a fatal failure
    Proceed,
    /// Run one extra analysis round
    Deepen,
    Abort,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::Proceed => "proceed",
            Self::Deepen => "deepen",
            Self::Abort => "abort",
        })
    }
}

/// Routing decision returned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDecision {
    Continue,
    DeepenOnce,
    Abort,
}

impl From<FlowDecision> for FlowEvent {
    fn from(decision: FlowDecision) -> Self {
        match decision {
            FlowDecision::Continue => Self::Proceed,
            FlowDecision::DeepenOnce => Self::Deepen,
            FlowDecision::Abort => Self::Abort,
        }
    }
}

/// Every legal edge of the state machine
const TRANSITIONS: &[(FlowState, FlowEvent, FlowState)] = {
    use FlowEvent as E;
    use FlowState as S;
    &[
        (S::Pending, E::CacheHit, S::Done),
        (S::Pending, E::CacheMiss, S::Collecting),
        (S::Pending, E::Abort, S::Aborted),
        (S::Collecting, E::Proceed, S::Analyzing),
        (S::Collecting, E::Abort, S::Aborted),
        (S::Analyzing, E::Proceed, S::Deciding),
        (S::Analyzing, E::Deepen, S::Analyzing),
        (S::Analyzing, E::Abort, S::Aborted),
        (S::Deciding, E::Proceed, S::Done),
        (S::Deciding, E::Abort, S::Aborted),
    ]
};

/// Next state for `event` in `state`
pub fn transition(state: FlowState, event: FlowEvent) -> Result<FlowState> {
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == state && *on == event)
        .map(|(_, _, to)| *to)
        .ok_or(WorkflowError::InvalidTransition { from: state, event })
}

/// Stages executed on entering `state`
///
/// The analysis phase runs the core analysis stages once, and the sentiment
/// stage only when the run is deepened.
pub fn stages_for(state: FlowState, deepening: bool) -> &'static [Stage] {
    match state {
        FlowState::Collecting => &[Stage::DataCollection],
        FlowState::Analyzing if deepening => &[Stage::Sentiment],
        FlowState::Analyzing => &[Stage::Fundamental, Stage::Risk, Stage::Industry],
        FlowState::Deciding => &[Stage::Decision],
        FlowState::Pending | FlowState::Done | FlowState::Aborted => &[],
    }
}

/// Position of one run in the state machine
///
/// Tracks the visited states and refuses a second deepen round, so the only
/// loop in the machine executes at most once.
#[derive(Debug, Clone)]
pub struct Flow {
    state: FlowState,
    deepened: bool,
    trail: Vec<FlowState>,
}

impl Flow {
    pub fn new() -> Self {
        Self {
            state: FlowState::Pending,
            deepened: false,
            trail: vec![FlowState::Pending],
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn deepened(&self) -> bool {
        self.deepened
    }

    /// States visited so far, in order
    pub fn trail(&self) -> &[FlowState] {
        &self.trail
    }

    pub fn apply(&mut self, event: FlowEvent) -> Result<FlowState> {
        if event == FlowEvent::Deepen && self.deepened {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                event,
            });
        }

        let next = transition(self.state, event)?;
        if event == FlowEvent::Deepen {
            self.deepened = true;
        }
        self.state = next;
        self.trail.push(next);
        Ok(next)
    }
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure decision logic for single-target and batch runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowController {
    quality_floor: f64,
    degraded_penalty: f64,
}

impl FlowController {
    pub fn new(quality_floor: f64, degraded_penalty: f64) -> Self {
        Self {
            quality_floor: quality_floor.clamp(0.0, 1.0),
            degraded_penalty: degraded_penalty.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &StockConfig) -> Self {
        Self::new(config.quality_floor, config.degraded_quality_penalty)
    }

    pub fn quality_floor(&self) -> f64 {
        self.quality_floor
    }

    /// After data collection: only a fatal failure stops the run
    pub fn assess_collection(&self, result: &StageResult) -> FlowDecision {
        if result.is_fatal() {
            FlowDecision::Abort
        } else {
            FlowDecision::Continue
        }
    }

    /// After an analysis round
    ///
    /// A fatal failure aborts. Otherwise a run whose aggregated quality is
    /// below the floor is deepened, unless it already was.
    pub fn assess_analysis(&self, results: &[StageResult], deepened: bool) -> FlowDecision {
        if results.iter().any(StageResult::is_fatal) {
            return FlowDecision::Abort;
        }
        if !deepened && self.aggregate_quality(results) < self.quality_floor {
            return FlowDecision::DeepenOnce;
        }
        FlowDecision::Continue
    }

    /// After decision synthesis: a report cannot be built without it
    pub fn assess_decision(&self, result: &StageResult) -> FlowDecision {
        if result.is_failed() {
            FlowDecision::Abort
        } else {
            FlowDecision::Continue
        }
    }

    /// Mean quality of the analysis stages in `results`
    ///
    /// Failed stages count as 0 and degraded stages are discounted by the
    /// configured penalty. No analysis stage at all yields 0.
    pub fn aggregate_quality(&self, results: &[StageResult]) -> f64 {
        let qualities: Vec<f64> = results
            .iter()
            .filter(|r| r.stage.is_scored())
            .map(|r| match r.status {
                StageStatus::Ok => r.data_quality,
                StageStatus::Degraded => r.data_quality * self.degraded_penalty,
                StageStatus::Failed => 0.0,
            })
            .collect();

        if qualities.is_empty() {
            0.0
        } else {
            qualities.iter().sum::<f64>() / qualities.len() as f64
        }
    }

    /// Choose how a batch of `len` requests is dispatched
    ///
    /// A single request runs inline; anything but a healthy collaborator
    /// forces sequential runs to shed load; otherwise up to `budget`
    /// requests run at once, in waves when there are more.
    pub fn advise_strategy(
        &self,
        len: usize,
        budget: usize,
        health: CollaboratorHealth,
    ) -> ExecutionStrategy {
        if len <= 1 || health != CollaboratorHealth::Healthy {
            ExecutionStrategy::Sequential
        } else if len <= budget {
            ExecutionStrategy::Parallel
        } else {
            ExecutionStrategy::Waves {
                size: budget.max(1),
            }
        }
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::from_config(&StockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{FailureKind, StageFailure};
    use serde_json::json;

    fn ok(stage: Stage, quality: f64) -> StageResult {
        StageResult::completed(stage, StageStatus::Ok, json!({}), quality)
    }

    fn degraded(stage: Stage, quality: f64) -> StageResult {
        StageResult::completed(stage, StageStatus::Degraded, json!({}), quality)
    }

    fn fatal(stage: Stage) -> StageResult {
        StageResult::failed(stage, StageFailure::new(FailureKind::Fatal, "invalid ticker"))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut flow = Flow::new();
        for event in [
            FlowEvent::CacheMiss,
            FlowEvent::Proceed,
            FlowEvent::Proceed,
            FlowEvent::Proceed,
        ] {
            flow.apply(event).unwrap();
        }
        assert_eq!(
            flow.trail(),
            &[
                FlowState::Pending,
                FlowState::Collecting,
                FlowState::Analyzing,
                FlowState::Deciding,
                FlowState::Done,
            ]
        );
        assert!(flow.state().is_terminal());
    }

    #[test]
    fn test_cache_hit_goes_straight_to_done() {
        assert_eq!(
            transition(FlowState::Pending, FlowEvent::CacheHit).unwrap(),
            FlowState::Done
        );
    }

    #[test]
    fn test_every_active_state_can_abort() {
        for state in [
            FlowState::Pending,
            FlowState::Collecting,
            FlowState::Analyzing,
            FlowState::Deciding,
        ] {
            assert_eq!(
                transition(state, FlowEvent::Abort).unwrap(),
                FlowState::Aborted
            );
        }
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for state in [FlowState::Done, FlowState::Aborted] {
            for event in [
                FlowEvent::CacheHit,
                FlowEvent::CacheMiss,
                FlowEvent::Proceed,
                FlowEvent::Deepen,
                FlowEvent::Abort,
            ] {
                assert!(transition(state, event).is_err(), "{state} on {event}");
            }
        }
    }

    #[test]
    fn test_deepen_only_loops_in_analysis_and_only_once() {
        assert!(transition(FlowState::Collecting, FlowEvent::Deepen).is_err());

        let mut flow = Flow::new();
        flow.apply(FlowEvent::CacheMiss).unwrap();
        flow.apply(FlowEvent::Proceed).unwrap();

        assert_eq!(flow.apply(FlowEvent::Deepen).unwrap(), FlowState::Analyzing);
        assert!(flow.deepened());

        let err = flow.apply(FlowEvent::Deepen).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(flow.state(), FlowState::Analyzing);
    }

    #[test]
    fn test_stages_for_each_phase() {
        assert_eq!(stages_for(FlowState::Collecting, false), &[Stage::DataCollection]);
        assert_eq!(
            stages_for(FlowState::Analyzing, false),
            &[Stage::Fundamental, Stage::Risk, Stage::Industry]
        );
        assert_eq!(stages_for(FlowState::Analyzing, true), &[Stage::Sentiment]);
        assert_eq!(stages_for(FlowState::Deciding, false), &[Stage::Decision]);
        assert!(stages_for(FlowState::Done, false).is_empty());
    }

    #[test]
    fn test_aggregate_quality() {
        let controller = FlowController::new(0.6, 0.5);
        let results = [
            ok(Stage::DataCollection, 0.1), // not an analysis stage
            ok(Stage::Fundamental, 0.9),
            degraded(Stage::Risk, 0.8),
            StageResult::failed(Stage::Industry, StageFailure::timeout()),
        ];
        let expected = (0.9 + 0.4 + 0.0) / 3.0;
        assert!((controller.aggregate_quality(&results) - expected).abs() < 1e-9);
        assert_eq!(controller.aggregate_quality(&[]), 0.0);
    }

    #[test]
    fn test_assess_analysis() {
        let controller = FlowController::new(0.6, 0.8);
        let good = [ok(Stage::Fundamental, 0.9), ok(Stage::Risk, 0.8)];
        let poor = [ok(Stage::Fundamental, 0.3), ok(Stage::Risk, 0.4)];

        assert_eq!(controller.assess_analysis(&good, false), FlowDecision::Continue);
        assert_eq!(controller.assess_analysis(&poor, false), FlowDecision::DeepenOnce);
        assert_eq!(controller.assess_analysis(&poor, true), FlowDecision::Continue);

        let broken = [ok(Stage::Fundamental, 0.9), fatal(Stage::Risk)];
        assert_eq!(controller.assess_analysis(&broken, false), FlowDecision::Abort);
    }

    #[test]
    fn test_assess_collection_and_decision() {
        let controller = FlowController::default();

        assert_eq!(
            controller.assess_collection(&fatal(Stage::DataCollection)),
            FlowDecision::Abort
        );
        assert_eq!(
            controller.assess_collection(&StageResult::failed(
                Stage::DataCollection,
                StageFailure::timeout()
            )),
            FlowDecision::Continue
        );
        assert_eq!(
            controller.assess_decision(&StageResult::failed(
                Stage::Decision,
                StageFailure::timeout()
            )),
            FlowDecision::Abort
        );
        assert_eq!(
            controller.assess_decision(&ok(Stage::Decision, 0.2)),
            FlowDecision::Continue
        );
    }

    #[test]
    fn test_strategy_selection() {
        let controller = FlowController::default();
        let healthy = CollaboratorHealth::Healthy;

        assert_eq!(controller.advise_strategy(1, 5, healthy), ExecutionStrategy::Sequential);
        assert_eq!(controller.advise_strategy(0, 5, healthy), ExecutionStrategy::Sequential);
        assert_eq!(controller.advise_strategy(3, 5, healthy), ExecutionStrategy::Parallel);
        assert_eq!(controller.advise_strategy(5, 5, healthy), ExecutionStrategy::Parallel);

        let waves = controller.advise_strategy(12, 5, healthy);
        assert_eq!(waves, ExecutionStrategy::Waves { size: 5 });
        assert_eq!(waves.plan(12), vec![5, 5, 2]);
    }

    #[test]
    fn test_unhealthy_collaborator_forces_sequential() {
        let controller = FlowController::default();
        for health in [CollaboratorHealth::Degraded, CollaboratorHealth::Unavailable] {
            assert_eq!(
                controller.advise_strategy(3, 5, health),
                ExecutionStrategy::Sequential
            );
            assert_eq!(
                controller.advise_strategy(12, 5, health),
                ExecutionStrategy::Sequential
            );
        }
    }

    #[test]
    fn test_decision_maps_to_event() {
        assert_eq!(FlowEvent::from(FlowDecision::Continue), FlowEvent::Proceed);
        assert_eq!(FlowEvent::from(FlowDecision::DeepenOnce), FlowEvent::Deepen);
        assert_eq!(FlowEvent::from(FlowDecision::Abort), FlowEvent::Abort);
    }
}
