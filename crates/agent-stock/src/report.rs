//! Analysis reports, scoring and ratings

use agent_core::{AnalysisRequest, Stage, StageResult, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Investment rating derived from a completed analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    StrongBuy,
    Buy,
    Overweight,
    Hold,
    Underweight,
    Sell,
    /// Completed without a usable score or recommendation
    NotRated,
    /// The run was aborted; no rating is guessed
    Unavailable,
}

impl Rating {
    /// Ratings ordered from most to least favorable
    pub const RANKED: [Rating; 6] = [
        Rating::StrongBuy,
        Rating::Buy,
        Rating::Overweight,
        Rating::Hold,
        Rating::Underweight,
        Rating::Sell,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::StrongBuy => "Strong Buy",
            Self::Buy => "Buy",
            Self::Overweight => "Overweight",
            Self::Hold => "Hold",
            Self::Underweight => "Underweight",
            Self::Sell => "Sell",
            Self::NotRated => "Not Rated",
            Self::Unavailable => "Unavailable",
        }
    }

    /// Higher is more favorable; `None` for ratings outside the scale
    pub fn rank(&self) -> Option<u8> {
        Self::RANKED
            .iter()
            .position(|r| r == self)
            .and_then(|pos| u8::try_from(Self::RANKED.len() - pos).ok())
    }

    /// Map an overall score in `[0, 100]` onto the rating scale
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 85.0 => Self::StrongBuy,
            s if s >= 70.0 => Self::Buy,
            s if s >= 60.0 => Self::Overweight,
            s if s >= 45.0 => Self::Hold,
            s if s >= 30.0 => Self::Underweight,
            _ => Self::Sell,
        }
    }

    /// Recognize a rating in free-form recommendation text
    pub fn from_recommendation(text: &str) -> Option<Self> {
        let text = text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        // Order matters: "strong buy" contains "buy"
        if has(&["strong buy", "强烈买入", "强烈推荐"]) {
            Some(Self::StrongBuy)
        } else if has(&["underweight", "减持"]) {
            Some(Self::Underweight)
        } else if has(&["overweight", "增持"]) {
            Some(Self::Overweight)
        } else if has(&["sell", "卖出"]) {
            Some(Self::Sell)
        } else if has(&["buy", "买入"]) {
            Some(Self::Buy)
        } else if has(&["hold", "neutral", "持有", "中性"]) {
            Some(Self::Hold)
        } else {
            None
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-stage scores and the weighted overall score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub fundamental: Option<f64>,
    /// Higher means riskier; inverted when weighted
    pub risk: Option<f64>,
    pub industry: Option<f64>,
    pub sentiment: Option<f64>,
    pub overall: Option<f64>,
}

impl ScoreCard {
    const FUNDAMENTAL_WEIGHT: f64 = 0.35;
    const RISK_WEIGHT: f64 = 0.25;
    const INDUSTRY_WEIGHT: f64 = 0.25;
    const SENTIMENT_WEIGHT: f64 = 0.15;

    /// Score the last result recorded for each analysis stage
    pub fn from_results(results: &[StageResult]) -> Self {
        let latest = |stage: Stage| {
            results
                .iter()
                .rev()
                .find(|r| r.stage == stage)
                .and_then(StageResult::score)
        };

        let mut card = Self {
            fundamental: latest(Stage::Fundamental),
            risk: latest(Stage::Risk),
            industry: latest(Stage::Industry),
            sentiment: latest(Stage::Sentiment),
            overall: None,
        };
        card.overall = card.weighted();
        card
    }

    /// Weighted mean over the components present, weights renormalized
    fn weighted(&self) -> Option<f64> {
        let components = [
            (self.fundamental, Self::FUNDAMENTAL_WEIGHT),
            (self.risk.map(|r| 100.0 - r), Self::RISK_WEIGHT),
            (self.industry, Self::INDUSTRY_WEIGHT),
            (self.sentiment, Self::SENTIMENT_WEIGHT),
        ];

        let (sum, weight) = components
            .iter()
            .filter_map(|(value, weight)| value.map(|v| (v * weight, *weight)))
            .fold((0.0, 0.0), |(s, w), (v, wt)| (s + v, w + wt));

        (weight > 0.0).then(|| sum / weight)
    }
}

/// Terminal state of a single-target run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Done,
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Done => "done",
            Self::Aborted => "aborted",
        })
    }
}

/// Aggregated result of one single-target run
///
/// Built once by the orchestrator when the run terminates and never modified
/// afterwards, apart from the `from_cache` marker set on cache hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    request: AnalysisRequest,
    outcome: Outcome,
    stages: Vec<StageResult>,
    scores: ScoreCard,
    rating: Rating,
    recommendation: Option<String>,
    data_quality: f64,
    reason: Option<String>,
    deepened: bool,
    generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing)]
    from_cache: bool,
}

impl AnalysisReport {
    /// Report for a run that reached `Done`
    pub fn completed(
        request: AnalysisRequest,
        stages: Vec<StageResult>,
        data_quality: f64,
        deepened: bool,
    ) -> Self {
        let scores = ScoreCard::from_results(&stages);
        let recommendation = stages
            .iter()
            .rev()
            .find(|r| r.stage == Stage::Decision && r.status != StageStatus::Failed)
            .and_then(|r| r.payload.get("recommendation"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let rating = recommendation
            .as_deref()
            .and_then(Rating::from_recommendation)
            .or_else(|| scores.overall.map(Rating::from_score))
            .unwrap_or(Rating::NotRated);

        Self {
            request,
            outcome: Outcome::Done,
            stages,
            scores,
            rating,
            recommendation,
            data_quality,
            reason: None,
            deepened,
            generated_at: Utc::now(),
            from_cache: false,
        }
    }

    /// Report for a run that ended in `Aborted`
    pub fn aborted(
        request: AnalysisRequest,
        stages: Vec<StageResult>,
        reason: impl Into<String>,
        deepened: bool,
    ) -> Self {
        Self {
            request,
            outcome: Outcome::Aborted,
            scores: ScoreCard::from_results(&stages),
            stages,
            rating: Rating::Unavailable,
            recommendation: None,
            data_quality: 0.0,
            reason: Some(reason.into()),
            deepened,
            generated_at: Utc::now(),
            from_cache: false,
        }
    }

    /// Mark a report that was served from the cache
    pub fn into_cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }

    pub fn ticker(&self) -> &str {
        self.request.ticker()
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    pub fn scores(&self) -> &ScoreCard {
        &self.scores
    }

    pub fn overall_score(&self) -> Option<f64> {
        self.scores.overall
    }

    pub fn rating(&self) -> Rating {
        self.rating
    }

    pub fn recommendation(&self) -> Option<&str> {
        self.recommendation.as_deref()
    }

    /// Aggregated data quality of the analysis stages
    pub fn data_quality(&self) -> f64 {
        self.data_quality
    }

    /// Why the run was aborted
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn deepened(&self) -> bool {
        self.deepened
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }
}
