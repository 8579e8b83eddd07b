//! HTTP implementation of the Network Client
//!
//! Posts event batches to `{api_url}/3.0/projects/{project_id}/events` with
//! the API key in the Authorization header. Stateless apart from reqwest's
//! connection reuse.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

use super::{BatchPayload, BatchResponse, NetworkClient, NetworkError};

/// HTTP client for the events API
pub struct HttpNetworkClient {
    http_client: reqwest::Client,
    events_url: String,
    max_retries: usize,
}

impl HttpNetworkClient {
    /// Create a client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required
    /// fields.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.api_url.trim_end_matches('/');
        let events_url = format!(
            "{}/3.0/projects/{}/events",
            base_url,
            urlencoding::encode(&config.project_id)
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            events_url,
            max_retries: config.max_retries,
        })
    }

    /// One request/response exchange, classified but not retried
    async fn send_once(
        &self,
        payload: &BatchPayload,
    ) -> std::result::Result<BatchResponse, NetworkError> {
        let response = self
            .http_client
            .post(&self.events_url)
            .json(payload)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();

        if status.is_success() {
            response.json::<BatchResponse>().await.map_err(|e| {
                // A 2xx with an unreadable body is not worth resubmitting the
                // same payload for
                NetworkError::Terminal {
                    status: status.as_u16(),
                    message: format!("failed to parse response: {}", e),
                }
            })
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            if status.is_server_error() {
                Err(NetworkError::Retryable(format!(
                    "API error ({}): {}",
                    status, message
                )))
            } else {
                Err(NetworkError::Terminal {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl NetworkClient for HttpNetworkClient {
    /// Send a batch, retrying transient failures with exponential backoff
    async fn send(
        &self,
        payload: &BatchPayload,
    ) -> std::result::Result<BatchResponse, NetworkError> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    attempt = attempt + 1,
                    attempts = self.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying batch upload"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.send_once(payload).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, "Transient error sending batch");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| NetworkError::Retryable("max retries exceeded".to_string())))
    }
}

/// Classify a reqwest error into a retry class
fn classify_reqwest_error(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        NetworkError::Retryable(format!("HTTP request failed: {}", e))
    } else {
        NetworkError::Terminal {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            message: e.to_string(),
        }
    }
}
