//! Network Client for the events API
//!
//! The [`NetworkClient`] trait is the seam between the Upload Batcher and
//! the wire: the production [`HttpNetworkClient`](http::HttpNetworkClient)
//! posts batches over HTTPS, while tests substitute a scripted mock.
//!
//! Failures carry a retry class: timeouts, connection failures, and 5xx
//! responses are retryable; 4xx responses are terminal and make the batcher
//! drop the offending batch instead of retrying it forever.

pub mod http;

pub use http::HttpNetworkClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Network failure, classified for retry policy
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// Transient failure worth retrying (timeout, connection, 5xx)
    #[error("retryable: {0}")]
    Retryable(String),

    /// Permanent failure; retrying the same payload cannot succeed (4xx)
    #[error("terminal ({status}): {message}")]
    Terminal { status: u16, message: String },
}

impl NetworkError {
    /// Whether the batcher should keep the affected events pending for a
    /// later flush
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Retryable(_))
    }
}

/// One flush worth of events, grouped by collection.
///
/// Serializes to the wire body expected by the events endpoint: a mapping of
/// collection name to its ordered list of event bodies.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload(pub BTreeMap<String, Vec<Value>>);

impl BatchPayload {
    /// Total number of events across all collections
    pub fn event_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// Acknowledgment from the events endpoint: per-collection, per-event status
/// lists in the same order the events were submitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse(pub BTreeMap<String, Vec<EventStatus>>);

impl BatchResponse {
    /// Build an all-success acknowledgment matching a payload's shape.
    /// Used by tests and mock clients.
    pub fn all_success(payload: &BatchPayload) -> Self {
        let mut map = BTreeMap::new();
        for (collection, events) in &payload.0 {
            map.insert(
                collection.clone(),
                events
                    .iter()
                    .map(|_| EventStatus {
                        success: true,
                        error: None,
                    })
                    .collect(),
            );
        }
        BatchResponse(map)
    }
}

/// Outcome for a single submitted event
#[derive(Debug, Clone, Deserialize)]
pub struct EventStatus {
    /// Whether the service accepted the event
    pub success: bool,
    /// Rejection detail when `success` is false
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// Error detail attached to a rejected event
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Machine-readable error name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

/// Transport for event batches
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Submit a batch, returning the per-event acknowledgment.
    ///
    /// Implementations own their retry policy for retryable failures; a
    /// returned `Err` means the batch as a whole was not acknowledged.
    async fn send(&self, payload: &BatchPayload) -> Result<BatchResponse, NetworkError>;
}
