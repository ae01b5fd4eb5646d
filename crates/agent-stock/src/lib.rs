//! Stock analysis domain services
//!
//! Everything the orchestration layer needs around a single analysis that is
//! not orchestration itself:
//!
//! - [`cache`]: TTL report cache with sequence-ordered writes, in memory or
//!   backed by a JSON file
//! - [`report`]: per-run [`AnalysisReport`], weighted scoring and ratings
//! - [`summary`]: [`BatchSummary`] and batch statistics
//! - [`render`]: Markdown and JSON report renderers
//! - [`monitor`]: rule-based [`AlertMonitor`] observer
//! - [`api`]: HTTP analysis collaborator
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_stock::{CacheKey, CacheStore, MemoryCache, StockConfig};
//! use agent_core::AnalysisRequest;
//!
//! let config = StockConfig::builder().worker_budget(3).build()?;
//! let cache = MemoryCache::new();
//!
//! let key = CacheKey::for_request(&AnalysisRequest::new("Apple Inc.", "AAPL"));
//! cache.set(key.clone(), serde_json::json!({"score": 80}), config.cache_ttl).await?;
//! assert!(cache.get(&key).await?.is_some());
//! ```

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod monitor;
pub mod render;
pub mod report;
pub mod summary;

// Re-export main types for convenience
pub use api::HttpCollaborator;
pub use cache::{CacheEntry, CacheKey, CacheStats, CacheStore, FileCache, MemoryCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StockConfig, StockConfigBuilder};
pub use error::{Result, StockError};
pub use monitor::{
    Alert, AlertMonitor, AlertRule, AnalysisObserver, NotificationSink, RuleKind, TracingSink,
};
pub use render::{JsonRenderer, MarkdownRenderer, ReportRenderer};
pub use report::{AnalysisReport, Outcome, Rating, ScoreCard};
pub use summary::{BatchFailure, BatchStats, BatchSummary, ExecutionStrategy, ItemOutcome, Performer};
