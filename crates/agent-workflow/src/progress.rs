//! Batch progress tracking
//!
//! All counters live behind one mutex and are updated in a single critical
//! section per completion, so concurrent workers can never lose an update.
//! The progress callback always runs after the lock is released.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::error;

/// Point-in-time view of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    /// Runs that finished `Done`
    pub completed: usize,
    /// Runs that were aborted or rejected
    pub failed: usize,
    pub in_progress: usize,
    /// Finished share of the batch, `0..=100`
    pub percentage: f64,
    pub started_at: DateTime<Utc>,
    /// Estimated seconds until every request has finished
    pub eta_secs: Option<f64>,
}

impl BatchProgress {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn eta(&self) -> Option<Duration> {
        self.eta_secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }
}

/// Caller-supplied progress observer
pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    completed: usize,
    failed: usize,
    in_progress: usize,
}

/// Shared progress state of one batch run
pub struct ProgressTracker {
    total: usize,
    started_at: DateTime<Utc>,
    started: Instant,
    counters: Mutex<Counters>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(total: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            total,
            started_at: Utc::now(),
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
            callback,
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A run was dispatched
    pub fn start_item(&self) {
        self.counters().in_progress += 1;
    }

    /// A dispatched run terminated; `done` is false for aborted runs
    pub fn finish_item(&self, done: bool) -> BatchProgress {
        let snapshot = {
            let mut counters = self.counters();
            counters.in_progress = counters.in_progress.saturating_sub(1);
            if done {
                counters.completed += 1;
            } else {
                counters.failed += 1;
            }
            self.snapshot_of(&counters)
        };
        self.notify(&snapshot);
        snapshot
    }

    /// A request was rejected without being dispatched
    pub fn reject_item(&self) -> BatchProgress {
        let snapshot = {
            let mut counters = self.counters();
            counters.failed += 1;
            self.snapshot_of(&counters)
        };
        self.notify(&snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> BatchProgress {
        let counters = self.counters();
        self.snapshot_of(&counters)
    }

    fn snapshot_of(&self, counters: &Counters) -> BatchProgress {
        let finished = counters.completed + counters.failed;
        let percentage = if self.total == 0 {
            0.0
        } else {
            finished as f64 / self.total as f64 * 100.0
        };

        let eta_secs = (finished > 0).then(|| {
            let per_item = self.started.elapsed().as_secs_f64() / finished as f64;
            per_item * self.total.saturating_sub(finished) as f64
        });

        BatchProgress {
            total: self.total,
            completed: counters.completed,
            failed: counters.failed,
            in_progress: counters.in_progress,
            percentage,
            started_at: self.started_at,
            eta_secs,
        }
    }

    fn notify(&self, snapshot: &BatchProgress) {
        let Some(callback) = &self.callback else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            error!(
                finished = snapshot.finished(),
                total = snapshot.total,
                "progress callback panicked"
            );
        }
    }
}
