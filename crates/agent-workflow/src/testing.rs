//! Scripted collaborator shared by the orchestrator tests

use agent_core::{
    AnalysisCollaborator, AnalysisRequest, CollaboratorError, CollaboratorHealth, Context, Stage,
    StageOutput,
};
use agent_stock::{AnalysisObserver, AnalysisReport};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Answers every stage with fixed quality and counts calls
pub struct Scripted {
    quality: f64,
    health: CollaboratorHealth,
    delay: Duration,
    fatal_tickers: HashSet<String>,
    failing_stage: Option<(Stage, CollaboratorError)>,
    stalled_stage: Option<Stage>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<(String, Stage)>>,
}

impl Scripted {
    pub fn new(quality: f64) -> Self {
        Self {
            quality,
            health: CollaboratorHealth::Healthy,
            delay: Duration::ZERO,
            fatal_tickers: HashSet::new(),
            failing_stage: None,
            stalled_stage: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Data collection for `ticker` fails as an unknown symbol
    pub fn with_fatal_ticker(mut self, ticker: &str) -> Self {
        self.fatal_tickers.insert(ticker.to_string());
        self
    }

    pub fn with_failing_stage(mut self, stage: Stage, err: CollaboratorError) -> Self {
        self.failing_stage = Some((stage, err));
        self
    }

    /// `stage` never answers
    pub fn with_stalled_stage(mut self, stage: Stage) -> Self {
        self.stalled_stage = Some(stage);
        self
    }

    pub fn with_health(mut self, health: CollaboratorHealth) -> Self {
        self.health = health;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn stages_called(&self, ticker: &str) -> Vec<Stage> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == ticker)
            .map(|(_, stage)| *stage)
            .collect()
    }

    pub fn tickers_called(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for (ticker, _) in self.log.lock().unwrap().iter() {
            if !seen.contains(ticker) {
                seen.push(ticker.clone());
            }
        }
        seen
    }
}

#[async_trait]
impl AnalysisCollaborator for Scripted {
    async fn execute(
        &self,
        stage: Stage,
        request: &AnalysisRequest,
        _context: &Context,
    ) -> Result<StageOutput, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push((request.ticker().to_string(), stage));

        if self.stalled_stage == Some(stage) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if stage == Stage::DataCollection && self.fatal_tickers.contains(request.ticker()) {
            return Err(CollaboratorError::Fatal(format!(
                "unknown ticker {}",
                request.ticker()
            )));
        }
        if let Some((failing, err)) = &self.failing_stage {
            if *failing == stage {
                return Err(err.clone());
            }
        }

        let payload = match stage {
            Stage::Decision => json!({ "recommendation": "Buy" }),
            Stage::DataCollection => json!({ "price": 187.2 }),
            _ => json!({ "score": 72.0 }),
        };
        Ok(StageOutput::ok(payload, self.quality))
    }

    async fn health(&self) -> CollaboratorHealth {
        self.health
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Observer that panics on reports for one ticker
pub struct PanickingObserver {
    ticker: String,
}

impl PanickingObserver {
    pub fn on(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
        }
    }
}

impl AnalysisObserver for PanickingObserver {
    fn on_report(&self, report: &AnalysisReport) {
        assert_ne!(report.ticker(), self.ticker, "observer failed");
    }
}
