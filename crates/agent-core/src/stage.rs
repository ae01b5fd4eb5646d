//! Analysis stages and their results

use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete analysis step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Market, financial and price data gathering
    DataCollection,
    /// Financial statements and valuation
    Fundamental,
    /// Risk assessment
    Risk,
    /// Industry position and competition
    Industry,
    /// Market sentiment; only run when a shallow pass lacks confidence
    Sentiment,
    /// Recommendation and report synthesis
    Decision,
}

impl Stage {
    /// Every stage, in pipeline order
    pub const ALL: [Stage; 6] = [
        Stage::DataCollection,
        Stage::Fundamental,
        Stage::Risk,
        Stage::Industry,
        Stage::Sentiment,
        Stage::Decision,
    ];

    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataCollection => "data_collection",
            Self::Fundamental => "fundamental",
            Self::Risk => "risk",
            Self::Industry => "industry",
            Self::Sentiment => "sentiment",
            Self::Decision => "decision",
        }
    }

    /// Whether this stage produces a component of the overall score
    pub fn is_scored(&self) -> bool {
        matches!(
            self,
            Self::Fundamental | Self::Risk | Self::Industry | Self::Sentiment
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome class of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    /// Usable output with lowered confidence; the pipeline keeps going
    Degraded,
    Failed,
}

/// Why a stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Retry budget exhausted on network or rate-limit errors
    Transient,
    /// Input can never succeed; aborts the run
    Fatal,
    /// The collaborator did not answer within the stage bound
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Timeout => "timeout",
        })
    }
}

/// Captured failure of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl StageFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, "timeout")
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Result of running one stage for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub payload: serde_json::Value,
    /// Confidence in `payload`, always within `[0, 1]`
    pub data_quality: f64,
    pub failure: Option<StageFailure>,
    /// Number of collaborator calls made, including the retry
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl StageResult {
    /// Successful or degraded output
    pub fn completed(
        stage: Stage,
        status: StageStatus,
        payload: serde_json::Value,
        data_quality: f64,
    ) -> Self {
        Self {
            stage,
            status,
            payload,
            data_quality: clamp_quality(data_quality),
            failure: None,
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    /// Failed stage with no usable payload
    pub fn failed(stage: Stage, failure: StageFailure) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            payload: serde_json::Value::Null,
            data_quality: 0.0,
            failure: Some(failure),
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }

    pub fn is_fatal(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Fatal)
    }

    /// Numeric `score` field of the payload, clamped to `[0, 100]`
    pub fn score(&self) -> Option<f64> {
        if self.is_failed() {
            return None;
        }
        self.payload
            .get("score")
            .and_then(serde_json::Value::as_f64)
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 100.0))
    }
}

fn clamp_quality(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_names_are_stable() {
        let names: Vec<_> = Stage::ALL.iter().map(Stage::as_str).collect();
        assert_eq!(
            names,
            [
                "data_collection",
                "fundamental",
                "risk",
                "industry",
                "sentiment",
                "decision"
            ]
        );
        assert_eq!(
            serde_json::to_string(&Stage::DataCollection).unwrap(),
            "\"data_collection\""
        );
    }

    #[test]
    fn test_quality_is_clamped() {
        let high = StageResult::completed(Stage::Risk, StageStatus::Ok, json!({}), 1.7);
        assert!((high.data_quality - 1.0).abs() < f64::EPSILON);

        let nan = StageResult::completed(Stage::Risk, StageStatus::Ok, json!({}), f64::NAN);
        assert!(nan.data_quality.abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_result() {
        let result = StageResult::failed(
            Stage::DataCollection,
            StageFailure::new(FailureKind::Fatal, "unknown ticker"),
        );
        assert!(result.is_failed());
        assert!(result.is_fatal());
        assert_eq!(result.score(), None);

        let timeout = StageResult::failed(Stage::Risk, StageFailure::timeout());
        assert!(!timeout.is_fatal());
        assert_eq!(timeout.failure.unwrap().reason, "timeout");
    }

    #[test]
    fn test_score_extraction() {
        let result = StageResult::completed(
            Stage::Fundamental,
            StageStatus::Degraded,
            json!({"score": 140.0}),
            0.5,
        );
        assert_eq!(result.score(), Some(100.0));

        let missing = StageResult::completed(Stage::Fundamental, StageStatus::Ok, json!({}), 0.9);
        assert_eq!(missing.score(), None);
    }
}
