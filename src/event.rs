//! Event data model
//!
//! An event is an ordered mapping of field names to JSON values, tagged with
//! the collection it belongs to. Events are immutable once persisted; the
//! Local Store assigns each one a monotonically increasing sequence id.
//!
//! At capture time the client fills in the reserved `keen` namespace on the
//! body unless the caller already set it:
//!
//! - `keen.timestamp`: RFC 3339 capture time
//! - `keen.id`: client-assigned UUID, which lets the server identify
//!   duplicates produced by at-least-once retries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Local sequence id assigned by the store (SQLite rowid).
pub type EventId = i64;

/// Reserved metadata namespace on event bodies.
pub const RESERVED_NAMESPACE: &str = "keen";

/// An event persisted in the Local Store and awaiting upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Local sequence id
    pub id: EventId,
    /// Collection the event belongs to
    pub collection: String,
    /// Event body (JSON object, key order preserved)
    pub body: Value,
    /// When the event was enqueued locally
    pub queued_at: DateTime<Utc>,
}

/// Fill in `keen.timestamp` and `keen.id` on an event body.
///
/// Caller-provided values take precedence; only missing fields are added.
pub fn enrich_reserved(body: &mut Map<String, Value>, captured_at: DateTime<Utc>) {
    let keen = body
        .entry(RESERVED_NAMESPACE)
        .or_insert_with(|| json!({}));

    if let Some(meta) = keen.as_object_mut() {
        meta.entry("timestamp".to_string())
            .or_insert_with(|| json!(captured_at.to_rfc3339()));
        meta.entry("id".to_string())
            .or_insert_with(|| json!(Uuid::new_v4().to_string()));
    }
}
