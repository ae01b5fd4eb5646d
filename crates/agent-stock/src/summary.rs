//! Batch summaries and statistics

use crate::report::{AnalysisReport, Rating};
use agent_core::AnalysisRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a batch was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecutionStrategy {
    /// One request after another on the caller's task
    Sequential,
    /// Every request at once
    Parallel,
    /// Consecutive groups of at most `size` concurrent requests
    Waves { size: usize },
}

impl ExecutionStrategy {
    /// Sizes of the groups dispatched for `len` requests, in order
    pub fn plan(&self, len: usize) -> Vec<usize> {
        if len == 0 {
            return Vec::new();
        }
        match self {
            Self::Sequential => vec![1; len],
            Self::Parallel => vec![len],
            Self::Waves { size } => {
                let size = (*size).max(1);
                (0..len)
                    .step_by(size)
                    .map(|start| size.min(len - start))
                    .collect()
            }
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
            Self::Waves { size } => write!(f, "waves of {size}"),
        }
    }
}

/// What happened to one request of a batch
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// The single-target run terminated, done or aborted
    Finished(AnalysisReport),
    /// Never dispatched because the request itself was invalid
    Rejected(String),
    /// Never dispatched because the batch was cancelled first
    Skipped,
}

/// A request that did not produce a `Done` report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Position in the submitted batch
    pub index: usize,
    pub ticker: String,
    pub company: String,
    pub reason: String,
}

/// One line of a performer ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub ticker: String,
    pub score: f64,
    pub rating: Rating,
}

/// Aggregate figures over a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Share of dispatched requests that finished `Done`, in `[0, 1]`
    pub success_rate: f64,
    pub average_score: Option<f64>,
    pub rating_distribution: BTreeMap<Rating, usize>,
    pub top_performers: Vec<Performer>,
    pub bottom_performers: Vec<Performer>,
}

/// Terminal artifact of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    run_id: String,
    strategy: ExecutionStrategy,
    total: usize,
    /// `Done` reports in submission order
    reports: Vec<AnalysisReport>,
    failures: Vec<BatchFailure>,
    skipped: Vec<AnalysisRequest>,
    cancelled: bool,
    waves_executed: usize,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl BatchSummary {
    const PERFORMERS: usize = 5;

    /// Assemble the summary from per-request outcomes given in submission order
    pub fn assemble(
        run_id: impl Into<String>,
        strategy: ExecutionStrategy,
        started_at: DateTime<Utc>,
        waves_executed: usize,
        cancelled: bool,
        items: Vec<(AnalysisRequest, ItemOutcome)>,
    ) -> Self {
        let total = items.len();
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();

        for (index, (request, outcome)) in items.into_iter().enumerate() {
            match outcome {
                ItemOutcome::Finished(report) if report.is_done() => reports.push(report),
                ItemOutcome::Finished(report) => failures.push(BatchFailure {
                    index,
                    ticker: request.ticker().to_string(),
                    company: request.company().to_string(),
                    reason: report.reason().unwrap_or("aborted").to_string(),
                }),
                ItemOutcome::Rejected(reason) => failures.push(BatchFailure {
                    index,
                    ticker: request.ticker().to_string(),
                    company: request.company().to_string(),
                    reason,
                }),
                ItemOutcome::Skipped => skipped.push(request),
            }
        }

        Self {
            run_id: run_id.into(),
            strategy,
            total,
            reports,
            failures,
            skipped,
            cancelled,
            waves_executed,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn reports(&self) -> &[AnalysisReport] {
        &self.reports
    }

    pub fn failures(&self) -> &[BatchFailure] {
        &self.failures
    }

    /// Requests left undispatched by cancellation
    pub fn skipped(&self) -> &[AnalysisRequest] {
        &self.skipped
    }

    pub fn succeeded(&self) -> usize {
        self.reports.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn waves_executed(&self) -> usize {
        self.waves_executed
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn stats(&self) -> BatchStats {
        let succeeded = self.reports.len();
        let failed = self.failures.len();
        let dispatched = succeeded + failed;

        let mut ranked: Vec<Performer> = self
            .reports
            .iter()
            .filter_map(|r| {
                r.overall_score().map(|score| Performer {
                    ticker: r.ticker().to_string(),
                    score,
                    rating: r.rating(),
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let average_score = (!ranked.is_empty())
            .then(|| ranked.iter().map(|p| p.score).sum::<f64>() / ranked.len() as f64);

        let mut rating_distribution = BTreeMap::new();
        for report in &self.reports {
            *rating_distribution.entry(report.rating()).or_insert(0) += 1;
        }

        let top_performers = ranked.iter().take(Self::PERFORMERS).cloned().collect();
        let bottom_performers = ranked
            .iter()
            .rev()
            .take(Self::PERFORMERS)
            .cloned()
            .collect();

        BatchStats {
            total: self.total,
            succeeded,
            failed,
            skipped: self.skipped.len(),
            success_rate: if dispatched == 0 {
                0.0
            } else {
                succeeded as f64 / dispatched as f64
            },
            average_score,
            rating_distribution,
            top_performers,
            bottom_performers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{Stage, StageResult, StageStatus};
    use serde_json::json;

    fn done(ticker: &str, score: f64) -> (AnalysisRequest, ItemOutcome) {
        let request = AnalysisRequest::for_ticker(ticker);
        let stage = StageResult::completed(
            Stage::Fundamental,
            StageStatus::Ok,
            json!({ "score": score }),
            1.0,
        );
        let report = AnalysisReport::completed(request.clone(), vec![stage], 1.0, false);
        (request, ItemOutcome::Finished(report))
    }

    #[test]
    fn test_wave_plan() {
        assert_eq!(ExecutionStrategy::Waves { size: 5 }.plan(12), vec![5, 5, 2]);
        assert_eq!(ExecutionStrategy::Waves { size: 5 }.plan(10), vec![5, 5]);
        assert_eq!(ExecutionStrategy::Parallel.plan(3), vec![3]);
        assert_eq!(ExecutionStrategy::Sequential.plan(2), vec![1, 1]);
        assert!(ExecutionStrategy::Parallel.plan(0).is_empty());
    }

    #[test]
    fn test_assemble_keeps_submission_order() {
        let aborted_request = AnalysisRequest::for_ticker("BAD");
        let aborted = AnalysisReport::aborted(aborted_request.clone(), vec![], "unknown ticker", false);

        let summary = BatchSummary::assemble(
            "run-1",
            ExecutionStrategy::Parallel,
            Utc::now(),
            1,
            false,
            vec![
                done("AAPL", 80.0),
                (aborted_request, ItemOutcome::Finished(aborted)),
                done("MSFT", 60.0),
                (AnalysisRequest::for_ticker("??"), ItemOutcome::Rejected("malformed ticker".into())),
            ],
        );

        let tickers: Vec<_> = summary.reports().iter().map(|r| r.ticker()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(summary.failures().len(), 2);
        assert_eq!(summary.failures()[0].index, 1);
        assert_eq!(summary.failures()[0].reason, "unknown ticker");
        assert_eq!(summary.failures()[1].index, 3);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_stats() {
        let mut items: Vec<_> = (0..7u8)
            .map(|i| done(&format!("T{i}"), 40.0 + f64::from(i) * 10.0))
            .collect();
        items.push((AnalysisRequest::for_ticker("SKIP"), ItemOutcome::Skipped));

        let summary = BatchSummary::assemble(
            "run-2",
            ExecutionStrategy::Waves { size: 5 },
            Utc::now(),
            2,
            true,
            items,
        );
        let stats = summary.stats();

        assert_eq!(stats.total, 8);
        assert_eq!(stats.succeeded, 7);
        assert_eq!(stats.skipped, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
        assert!((stats.average_score.unwrap() - 70.0).abs() < 1e-9);
        assert_eq!(stats.top_performers.len(), 5);
        assert_eq!(stats.top_performers[0].ticker, "T6");
        assert_eq!(stats.bottom_performers[0].ticker, "T0");
        assert_eq!(stats.rating_distribution.values().sum::<usize>(), 7);
        assert!(summary.is_cancelled());
    }

    #[test]
    fn test_stats_of_empty_summary() {
        let summary =
            BatchSummary::assemble("run-3", ExecutionStrategy::Sequential, Utc::now(), 0, false, vec![]);
        let stats = summary.stats();
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_score, None);
        assert!(stats.top_performers.is_empty());
    }
}
