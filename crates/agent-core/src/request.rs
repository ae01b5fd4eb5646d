//! Analysis requests

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static TICKER_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9.\-]{0,15}$").ok());

/// How deep an analysis should go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl Depth {
    /// Stable lowercase name, used in cache keys and wire formats
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Deep => "deep",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Depth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            other => Err(Error::InvalidRequest(format!("unknown depth: {other}"))),
        }
    }
}

/// A request to analyze one company
///
/// Requests are immutable once built. The ticker is normalized (trimmed,
/// upper-cased) at construction so that equal requests always compare equal
/// and derive the same cache key.
///
/// # Example
///
/// ```
/// use agent_core::{AnalysisRequest, Depth};
///
/// let request = AnalysisRequest::new("Apple Inc.", " aapl ").with_depth(Depth::Deep);
/// assert_eq!(request.ticker(), "AAPL");
/// assert_eq!(request.depth(), Depth::Deep);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawRequest")]
pub struct AnalysisRequest {
    company: String,
    ticker: String,
    depth: Depth,
}

/// Wire shape; deserialization goes through the normalizing constructors
#[derive(Deserialize)]
struct RawRequest {
    company: Option<String>,
    ticker: String,
    #[serde(default)]
    depth: Depth,
}

impl From<RawRequest> for AnalysisRequest {
    fn from(raw: RawRequest) -> Self {
        let request = match raw.company {
            Some(company) if !company.trim().is_empty() => Self::new(company, &raw.ticker),
            _ => Self::for_ticker(&raw.ticker),
        };
        request.with_depth(raw.depth)
    }
}

impl AnalysisRequest {
    /// Create a request with standard depth
    pub fn new(company: impl Into<String>, ticker: impl AsRef<str>) -> Self {
        Self {
            company: company.into().trim().to_string(),
            ticker: ticker.as_ref().trim().to_ascii_uppercase(),
            depth: Depth::default(),
        }
    }

    /// Create a request where only the ticker is known
    pub fn for_ticker(ticker: impl AsRef<str>) -> Self {
        let ticker = ticker.as_ref().trim().to_ascii_uppercase();
        Self {
            company: ticker.clone(),
            ticker,
            depth: Depth::default(),
        }
    }

    /// Set the requested depth
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Check the ticker shape before any collaborator is involved
    pub fn validate(&self) -> Result<()> {
        if self.ticker.is_empty() {
            return Err(Error::InvalidRequest("ticker is empty".to_string()));
        }

        let pattern = TICKER_PATTERN.as_ref().ok_or_else(|| {
            Error::InitializationFailed("ticker pattern failed to compile".to_string())
        })?;

        if !pattern.is_match(&self.ticker) {
            return Err(Error::InvalidRequest(format!(
                "malformed ticker: {}",
                self.ticker
            )));
        }

        Ok(())
    }
}

impl fmt::Display for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.company, self.ticker)
    }
}
