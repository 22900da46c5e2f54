//! Rate-limited extraction from the market data API
//!
//! - **limiter**: minimum delay between consecutive calls
//! - **http**: reqwest-backed [`JsonSource`] for the `/query` endpoint
//!
//! Failures are returned as [`FetchError`] values so the orchestrator can
//! record them against the work unit and move on to the next one.

pub mod http;
pub mod limiter;

pub use http::HttpSource;
pub use limiter::RateLimiter;

use crate::models::{RawPayload, WorkUnit};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a single work unit could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connect, timeout or body read failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP 429 or the provider's throttle notice
    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    /// Non-2xx status, malformed JSON or a provider error body
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

/// Something that can answer one work unit with a JSON document
#[async_trait]
pub trait JsonSource: Send + Sync {
    async fn get_json(&self, unit: &WorkUnit) -> Result<Value, FetchError>;
}

/// Inspect a 2xx body for the provider's in-band error shapes.
///
/// Alpha Vantage answers throttled or invalid requests with HTTP 200 and a
/// single `Note`, `Information` or `Error Message` key.
pub fn classify_body(body: Value) -> Result<Value, FetchError> {
    let Some(object) = body.as_object() else {
        return Err(FetchError::Upstream("response body is not a JSON object".to_string()));
    };

    if let Some(message) = object.get("Error Message") {
        return Err(FetchError::Upstream(value_text(message)));
    }

    let notice_only = !object.is_empty()
        && object.keys().all(|k| k == "Note" || k == "Information");
    if notice_only {
        let message = object
            .get("Note")
            .or_else(|| object.get("Information"))
            .map(value_text)
            .unwrap_or_default();
        return Err(FetchError::RateLimited(message));
    }

    Ok(body)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Issues one paced request per work unit
pub struct RateLimitedFetcher<S> {
    source: S,
    limiter: RateLimiter,
}

impl<S: JsonSource> RateLimitedFetcher<S> {
    pub fn new(source: S, limiter: RateLimiter) -> Self {
        Self { source, limiter }
    }

    /// Fetch one unit, waiting out the rate limit first.
    ///
    /// Cancellation aborts either the wait or the in-flight request.
    pub async fn fetch(
        &mut self,
        unit: &WorkUnit,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        if !self.limiter.wait(cancel).await {
            return Err(FetchError::Cancelled);
        }

        debug!(unit = %unit, "Requesting");
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = self.source.get_json(unit) => result?,
        };

        Ok(RawPayload {
            unit: unit.clone(),
            body,
        })
    }
}
