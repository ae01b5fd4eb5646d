//! JSON-over-HTTP analysis collaborator
//!
//! Endpoints, relative to the configured base URL:
//! - `POST stages/{stage}` with `{ stage, request, context }`, answering a
//!   [`StageOutput`]
//! - `GET health`, answering `{ "status": "healthy" | "degraded" | "unavailable" }`
//!
//! Rate limit: optional, requests per minute, shared by every stage call.

use crate::config::StockConfig;
use crate::error::{Result, StockError};
use agent_core::{
    AnalysisCollaborator, AnalysisRequest, CollaboratorError, CollaboratorHealth, Context, Stage,
    StageOutput,
};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest slice of an error body carried into a failure reason
const MAX_REASON_LEN: usize = 200;

#[derive(Serialize)]
struct StageCall<'a> {
    stage: Stage,
    request: &'a AnalysisRequest,
    context: &'a Context,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: CollaboratorHealth,
}

/// Map an unsuccessful HTTP status to a failure class
///
/// Request timeouts, rate limiting and server errors are worth one retry;
/// every other client error means the input can never succeed.
pub fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let mut reason = format!("HTTP {status}");
    let body = body.trim();
    if !body.is_empty() {
        reason.push_str(": ");
        reason.extend(body.chars().take(MAX_REASON_LEN));
    }

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        CollaboratorError::Transient(reason)
    } else {
        CollaboratorError::Fatal(reason)
    }
}

/// Remote analysis service client
pub struct HttpCollaborator {
    client: Client,
    base: Url,
    rate_limiter: Option<SharedRateLimiter>,
}

impl HttpCollaborator {
    /// Create a client for `endpoint`
    ///
    /// # Arguments
    /// * `endpoint` - Base URL of the service
    /// * `rate_limit` - Requests per minute; unlimited when `None`
    pub fn new(endpoint: &str, rate_limit: Option<u32>) -> Result<Self> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| StockError::ConfigError(format!("invalid endpoint {endpoint}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(StockError::ConfigError(format!(
                "endpoint must be http(s): {endpoint}"
            )));
        }
        // Relative joins replace the last segment unless the path ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let rate_limiter = rate_limit
            .and_then(NonZeroU32::new)
            .map(|per_minute| Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))));

        Ok(Self {
            client: Client::new(),
            base,
            rate_limiter,
        })
    }

    /// Create from the collaborator settings of `config`
    pub fn from_config(config: &StockConfig) -> Result<Self> {
        let endpoint = config.collaborator_endpoint.as_deref().ok_or_else(|| {
            StockError::ConfigError("collaborator_endpoint is not set".to_string())
        })?;
        Self::new(endpoint, config.collaborator_rate_limit)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn stage_url(&self, stage: Stage) -> std::result::Result<Url, CollaboratorError> {
        self.base
            .join(&format!("stages/{}", stage.as_str()))
            .map_err(|e| CollaboratorError::Fatal(format!("cannot build stage url: {e}")))
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }
}

#[async_trait]
impl AnalysisCollaborator for HttpCollaborator {
    async fn execute(
        &self,
        stage: Stage,
        request: &AnalysisRequest,
        context: &Context,
    ) -> std::result::Result<StageOutput, CollaboratorError> {
        let url = self.stage_url(stage)?;
        self.throttle().await;

        debug!(%url, ticker = request.ticker(), %stage, "calling analysis service");
        let response = self
            .client
            .post(url)
            .json(&StageCall {
                stage,
                request,
                context,
            })
            .send()
            .await
            .map_err(|e| CollaboratorError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &body);
            warn!(ticker = request.ticker(), %stage, error = %err, "analysis service rejected call");
            return Err(err);
        }

        response
            .json::<StageOutput>()
            .await
            .map_err(|e| CollaboratorError::Fatal(format!("unreadable stage output: {e}")))
    }

    async fn health(&self) -> CollaboratorHealth {
        let Ok(url) = self.base.join("health") else {
            return CollaboratorHealth::Unavailable;
        };

        let response = match self.client.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "health probe failed");
                return CollaboratorHealth::Unavailable;
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return CollaboratorHealth::Degraded;
        }
        if !status.is_success() {
            return CollaboratorHealth::Unavailable;
        }

        // A bare 2xx without a body still counts as healthy
        response
            .json::<HealthResponse>()
            .await
            .map_or(CollaboratorHealth::Healthy, |h| h.status)
    }

    fn name(&self) -> &str {
        "http"
    }
}
