//! HTTP extraction gateway
//!
//! Posts `{text, metadata, model}` to the configured endpoint and expects an
//! extraction result as the JSON body. Transport failures and 5xx/429 are
//! reported as unavailable (retryable); other non-2xx statuses are
//! rejections.

use crate::config::GatewayConfig;
use async_trait::async_trait;
use casework_audit::Metadata;
use casework_core::{ExtractionError, ExtractionGateway, ExtractionRequest, ExtractionResult};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpExtractionGateway {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ExtractBody<'a> {
    text: &'a str,
    metadata: &'a Metadata,
    model: &'a str,
}

impl HttpExtractionGateway {
    /// # Errors
    /// TLS backend initialisation failure.
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExtractionGateway for HttpExtractionGateway {
    async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
        let body = ExtractBody {
            text: &request.text,
            metadata: &request.metadata,
            model: &self.model,
        };
        let mut call = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|err| transport_error(&err, request.timeout_ms))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExtractionError::Unavailable(format!("gateway returned {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Rejected(format!("{status}: {}", detail.trim())));
        }

        let raw = response
            .text()
            .await
            .map_err(|err| transport_error(&err, request.timeout_ms))?;
        let result: ExtractionResult =
            serde_json::from_str(&raw).map_err(|err| ExtractionError::Malformed(err.to_string()))?;

        tracing::debug!(
            model = %result.model,
            facts = result.facts.len(),
            contexts = result.contexts.len(),
            "gateway replied"
        );
        Ok(result)
    }
}

fn transport_error(err: &reqwest::Error, timeout_ms: u64) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::Timeout { after_ms: timeout_ms }
    } else {
        ExtractionError::Unavailable(err.to_string())
    }
}
