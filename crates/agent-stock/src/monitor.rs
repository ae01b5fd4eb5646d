//! Alert monitoring over finished analyses
//!
//! [`AlertMonitor`] is an explicit observer: the orchestrator hands it every
//! report it produces and the monitor evaluates its rules, keeping its own
//! per-ticker state. Nothing here is global; each monitor owns its state and
//! lives as long as whoever constructed it.

use crate::report::{AnalysisReport, Rating};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Receives every report the orchestrator produces
pub trait AnalysisObserver: Send + Sync {
    fn on_report(&self, report: &AnalysisReport);
}

/// Condition checked against each report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "condition", content = "threshold")]
pub enum RuleKind {
    ScoreAbove(f64),
    ScoreBelow(f64),
    /// Rating moved up the scale since the previous report
    RatingUpgrade,
    /// Rating moved down the scale since the previous report
    RatingDowngrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    /// Restrict to one ticker; `None` matches every ticker
    pub ticker: Option<String>,
    pub kind: RuleKind,
    pub message: String,
}

impl AlertRule {
    pub fn new(id: impl Into<String>, kind: RuleKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ticker: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_ticker(mut self, ticker: impl AsRef<str>) -> Self {
        self.ticker = Some(ticker.as_ref().trim().to_ascii_uppercase());
        self
    }

    fn applies_to(&self, ticker: &str) -> bool {
        self.ticker.as_deref().is_none_or(|t| t == ticker)
    }

    fn matches(&self, report: &AnalysisReport, previous: Option<Rating>) -> bool {
        let current = report.rating().rank();
        let previous = previous.and_then(|r| r.rank());

        match self.kind {
            RuleKind::ScoreAbove(threshold) => report.overall_score().is_some_and(|s| s > threshold),
            RuleKind::ScoreBelow(threshold) => report.overall_score().is_some_and(|s| s < threshold),
            RuleKind::RatingUpgrade => matches!((previous, current), (Some(p), Some(c)) if c > p),
            RuleKind::RatingDowngrade => matches!((previous, current), (Some(p), Some(c)) if c < p),
        }
    }
}

/// A triggered rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule_id: String,
    pub ticker: String,
    pub message: String,
    pub score: Option<f64>,
    pub rating: Rating,
    pub previous_rating: Option<Rating>,
    pub triggered_at: DateTime<Utc>,
}

/// Destination for triggered alerts (log, email, chat, ...)
pub trait NotificationSink: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Emits alerts as `tracing` warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, alert: &Alert) {
        warn!(
            rule = %alert.rule_id,
            ticker = %alert.ticker,
            rating = %alert.rating,
            score = ?alert.score,
            "alert: {}",
            alert.message
        );
    }
}

#[derive(Default)]
struct MonitorState {
    last_rating: HashMap<String, Rating>,
    trigger_counts: HashMap<String, u64>,
    history: VecDeque<Alert>,
}

/// Rule-based alerting over a stream of reports
pub struct AlertMonitor {
    rules: Vec<AlertRule>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    history_limit: usize,
    state: Mutex<MonitorState>,
}

impl AlertMonitor {
    const DEFAULT_HISTORY: usize = 1000;

    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            sinks: vec![Arc::new(TracingSink)],
            history_limit: Self::DEFAULT_HISTORY,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Replace the default sinks
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluate every rule against `report`; returns the alerts raised
    pub fn evaluate(&self, report: &AnalysisReport) -> Vec<Alert> {
        // Aborted runs carry no rating to compare against
        if !report.is_done() {
            return Vec::new();
        }

        let ticker = report.ticker();
        let alerts: Vec<Alert> = {
            let mut state = self.state();
            let previous = state.last_rating.get(ticker).copied();

            let alerts: Vec<Alert> = self
                .rules
                .iter()
                .filter(|rule| rule.applies_to(ticker) && rule.matches(report, previous))
                .map(|rule| Alert {
                    rule_id: rule.id.clone(),
                    ticker: ticker.to_string(),
                    message: rule.message.clone(),
                    score: report.overall_score(),
                    rating: report.rating(),
                    previous_rating: previous,
                    triggered_at: Utc::now(),
                })
                .collect();

            state.last_rating.insert(ticker.to_string(), report.rating());
            for alert in &alerts {
                *state.trigger_counts.entry(alert.rule_id.clone()).or_insert(0) += 1;
                state.history.push_back(alert.clone());
            }
            while state.history.len() > self.history_limit {
                state.history.pop_front();
            }
            alerts
        };

        // Sinks run outside the lock
        for alert in &alerts {
            for sink in &self.sinks {
                sink.notify(alert);
            }
        }
        debug!(ticker, raised = alerts.len(), "evaluated alert rules");
        alerts
    }

    /// Most recent alerts first, optionally for one ticker
    pub fn history(&self, ticker: Option<&str>, limit: usize) -> Vec<Alert> {
        self.state()
            .history
            .iter()
            .rev()
            .filter(|a| ticker.is_none_or(|t| a.ticker == t))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn trigger_count(&self, rule_id: &str) -> u64 {
        self.state().trigger_counts.get(rule_id).copied().unwrap_or(0)
    }

    /// Last rating seen for `ticker`
    pub fn last_rating(&self, ticker: &str) -> Option<Rating> {
        self.state().last_rating.get(ticker).copied()
    }
}

impl AnalysisObserver for AlertMonitor {
    fn on_report(&self, report: &AnalysisReport) {
        self.evaluate(report);
    }
}
