//! Configuration management utilities

use crate::logging::LogFormat;
use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Process-level configuration shared by binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,
    /// Environment (development, production, ...)
    pub environment: String,
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_filter: String,
    /// Log line format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "stock-analysis".to_string(),
            environment: "development".to_string(),
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Apply `APP_ENV` and `LOG_FORMAT` overrides
    pub fn with_env(mut self) -> Self {
        if let Ok(environment) = std::env::var("APP_ENV") {
            self.environment = environment;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            if format.eq_ignore_ascii_case("json") {
                self.log_format = LogFormat::Json;
            }
        }
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Read and deserialize a JSON file
pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
