//! reqwest client for the market data `/query` endpoint

use super::{classify_body, FetchError, JsonSource};
use crate::models::WorkUnit;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// GETs `base_url?function=..&symbol=..&apikey=..` and parses the JSON body
pub struct HttpSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mdp-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

/// The request URL carries the API key, so it is stripped from the message
fn transport(err: reqwest::Error) -> FetchError {
    FetchError::Transport(err.without_url().to_string())
}

#[async_trait]
impl JsonSource for HttpSource {
    async fn get_json(&self, unit: &WorkUnit) -> Result<Value, FetchError> {
        let mut params = unit.query_params();
        params.push(("apikey", self.api_key.as_str()));

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Upstream(format!("HTTP {status}")));
        }

        let bytes = response.bytes().await.map_err(transport)?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Upstream(format!("Malformed JSON: {e}")))?;

        classify_body(body)
    }
}
