//! Configuration for stock analysis runs

use crate::error::{Result, StockError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations are written as fractional seconds in config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Configuration for stock analysis operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    /// Consult and populate the report cache
    pub cache_enabled: bool,

    /// Lifetime of a cached report
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,

    /// Persist the cache to this file when set
    pub cache_path: Option<PathBuf>,

    /// Upper bound on a single collaborator call
    #[serde(with = "duration_secs")]
    pub stage_timeout: Duration,

    /// Fixed pause before the single retry of a transient failure
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,

    /// Aggregated data quality below which one extra analysis round runs
    pub quality_floor: f64,

    /// Multiplier applied to the quality of degraded stages
    pub degraded_quality_penalty: f64,

    /// Maximum concurrent single-target runs in a batch
    pub worker_budget: usize,

    /// Pause between consecutive waves of a batch
    #[serde(with = "duration_secs")]
    pub wave_pause: Duration,

    /// Base URL of the remote analysis service
    pub collaborator_endpoint: Option<String>,

    /// Requests per minute allowed against the collaborator
    pub collaborator_rate_limit: Option<u32>,

    /// Directory rendered reports are written to
    pub report_dir: PathBuf,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600), // 1 hour
            cache_path: None,
            stage_timeout: Duration::from_secs(120),
            retry_backoff: Duration::from_secs(2),
            quality_floor: 0.6,
            degraded_quality_penalty: 0.8,
            worker_budget: 5,
            wave_pause: Duration::from_secs(2),
            collaborator_endpoint: None,
            collaborator_rate_limit: None,
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl StockConfig {
    /// Create a new configuration builder
    pub fn builder() -> StockConfigBuilder {
        StockConfigBuilder::default()
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        agent_utils::load_json_file(path).map_err(|e| StockError::ConfigError(format!("{e:#}")))
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(endpoint) = std::env::var("STOCK_ANALYSIS_ENDPOINT") {
            self.collaborator_endpoint = Some(endpoint);
        }
        if let Ok(workers) = std::env::var("STOCK_ANALYSIS_WORKERS") {
            self.worker_budget = workers.parse().map_err(|_| {
                StockError::ConfigError(format!("STOCK_ANALYSIS_WORKERS is not a number: {workers}"))
            })?;
        }
        if let Ok(path) = std::env::var("STOCK_ANALYSIS_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("STOCK_ANALYSIS_REPORT_DIR") {
            self.report_dir = PathBuf::from(dir);
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_budget == 0 {
            return Err(StockError::ConfigError(
                "worker_budget must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.quality_floor) {
            return Err(StockError::ConfigError(format!(
                "quality_floor must be within [0, 1], got {}",
                self.quality_floor
            )));
        }

        if !(0.0..=1.0).contains(&self.degraded_quality_penalty) {
            return Err(StockError::ConfigError(format!(
                "degraded_quality_penalty must be within [0, 1], got {}",
                self.degraded_quality_penalty
            )));
        }

        if self.stage_timeout.is_zero() {
            return Err(StockError::ConfigError(
                "stage_timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(endpoint) = &self.collaborator_endpoint {
            let url = url::Url::parse(endpoint).map_err(|e| {
                StockError::ConfigError(format!("invalid collaborator endpoint {endpoint}: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(StockError::ConfigError(format!(
                    "collaborator endpoint must be http(s): {endpoint}"
                )));
            }
        }

        if self.collaborator_rate_limit == Some(0) {
            return Err(StockError::ConfigError(
                "collaborator_rate_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for StockConfig
#[derive(Debug, Default)]
pub struct StockConfigBuilder {
    cache_enabled: Option<bool>,
    cache_ttl: Option<Duration>,
    cache_path: Option<PathBuf>,
    stage_timeout: Option<Duration>,
    retry_backoff: Option<Duration>,
    quality_floor: Option<f64>,
    degraded_quality_penalty: Option<f64>,
    worker_budget: Option<usize>,
    wave_pause: Option<Duration>,
    collaborator_endpoint: Option<String>,
    collaborator_rate_limit: Option<u32>,
    report_dir: Option<PathBuf>,
}

impl StockConfigBuilder {
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn quality_floor(mut self, floor: f64) -> Self {
        self.quality_floor = Some(floor);
        self
    }

    pub fn degraded_quality_penalty(mut self, penalty: f64) -> Self {
        self.degraded_quality_penalty = Some(penalty);
        self
    }

    pub fn worker_budget(mut self, workers: usize) -> Self {
        self.worker_budget = Some(workers);
        self
    }

    pub fn wave_pause(mut self, pause: Duration) -> Self {
        self.wave_pause = Some(pause);
        self
    }

    pub fn collaborator_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.collaborator_endpoint = Some(endpoint.into());
        self
    }

    pub fn collaborator_rate_limit(mut self, per_minute: u32) -> Self {
        self.collaborator_rate_limit = Some(per_minute);
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<StockConfig> {
        let defaults = StockConfig::default();

        let config = StockConfig {
            cache_enabled: self.cache_enabled.unwrap_or(defaults.cache_enabled),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.cache_ttl),
            cache_path: self.cache_path.or(defaults.cache_path),
            stage_timeout: self.stage_timeout.unwrap_or(defaults.stage_timeout),
            retry_backoff: self.retry_backoff.unwrap_or(defaults.retry_backoff),
            quality_floor: self.quality_floor.unwrap_or(defaults.quality_floor),
            degraded_quality_penalty: self
                .degraded_quality_penalty
                .unwrap_or(defaults.degraded_quality_penalty),
            worker_budget: self.worker_budget.unwrap_or(defaults.worker_budget),
            wave_pause: self.wave_pause.unwrap_or(defaults.wave_pause),
            collaborator_endpoint: self.collaborator_endpoint.or(defaults.collaborator_endpoint),
            collaborator_rate_limit: self
                .collaborator_rate_limit
                .or(defaults.collaborator_rate_limit),
            report_dir: self.report_dir.unwrap_or(defaults.report_dir),
        };

        config.validate()?;
        Ok(config)
    }
}
