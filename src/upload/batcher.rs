//! Flush pipeline: snapshot, serialize, send, commit deletions

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::watch;

use crate::event::{EventId, PendingEvent};
use crate::net::{BatchPayload, NetworkClient};
use crate::store::Store;

/// Summary of one flush.
///
/// Network failures are handled inside the batcher and surface here only as
/// counts and a reason string; nothing is swallowed silently.
#[derive(Debug, Clone, Default)]
pub struct FlushResult {
    /// Events acknowledged and deleted from the store
    pub events_sent: usize,
    /// Events deleted without delivery (terminal rejection by the service)
    pub events_dropped: usize,
    /// Events selected for this flush but left pending for a later attempt
    pub events_pending: usize,
    /// Failure reason, if the flush did not fully succeed
    pub error: Option<String>,
    /// True when this call coalesced onto an already-running flush
    pub coalesced: bool,
}

/// Batches pending events and uploads them.
///
/// At most one flush runs at a time: a `flush` call arriving while one is in
/// flight waits for it and returns the in-flight result instead of starting
/// a second upload.
pub struct UploadBatcher {
    store: Arc<dyn Store>,
    net: Arc<dyn NetworkClient>,
    flush_batch_size: usize,
    /// Receiver for the in-flight flush, if any. Present exactly while a
    /// leader flush is running.
    in_flight: Mutex<Option<watch::Receiver<Option<FlushResult>>>>,
}

impl UploadBatcher {
    /// Create a batcher over a store and a network client
    pub fn new(store: Arc<dyn Store>, net: Arc<dyn NetworkClient>, flush_batch_size: usize) -> Self {
        Self {
            store,
            net,
            flush_batch_size,
            in_flight: Mutex::new(None),
        }
    }

    /// Flush pending events to the service.
    ///
    /// Selects up to the configured batch size per collection, uploads them
    /// in one exchange, and deletes exactly the acknowledged events.
    /// Concurrent calls coalesce into a single effective flush.
    pub async fn flush(&self) -> FlushResult {
        enum Role {
            Leader(watch::Sender<Option<FlushResult>>),
            Follower(watch::Receiver<Option<FlushResult>>),
        }

        let role = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(rx) = in_flight.as_ref() {
                Role::Follower(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                *in_flight = Some(rx);
                Role::Leader(tx)
            }
        };

        match role {
            // Wait for the in-flight flush and adopt its result
            Role::Follower(mut rx) => Self::await_in_flight(&mut rx).await,
            Role::Leader(tx) => {
                let result = self.do_flush().await;
                *self.in_flight.lock().unwrap() = None;
                let _ = tx.send(Some(result.clone()));
                result
            }
        }
    }

    async fn await_in_flight(rx: &mut watch::Receiver<Option<FlushResult>>) -> FlushResult {
        loop {
            let current = rx.borrow().clone();
            if let Some(mut result) = current {
                result.coalesced = true;
                return result;
            }
            if rx.changed().await.is_err() {
                // Leader dropped without publishing (shutdown); the events
                // it selected remain pending for the next flush
                return FlushResult {
                    coalesced: true,
                    error: Some("in-flight flush abandoned".to_string()),
                    ..Default::default()
                };
            }
        }
    }

    async fn do_flush(&self) -> FlushResult {
        let mut result = FlushResult::default();

        // Snapshot under the store's lock for a consistent pending set
        let pending = match self.store.list_pending(self.flush_batch_size) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to snapshot pending events");
                result.error = Some(e.to_string());
                return result;
            }
        };

        if pending.is_empty() {
            return result;
        }

        let mut groups: BTreeMap<String, Vec<PendingEvent>> = BTreeMap::new();
        for event in pending {
            groups.entry(event.collection.clone()).or_default().push(event);
        }

        let payload = BatchPayload(
            groups
                .iter()
                .map(|(collection, events)| {
                    (
                        collection.clone(),
                        events.iter().map(|e| e.body.clone()).collect(),
                    )
                })
                .collect(),
        );
        let selected = payload.event_count();

        tracing::debug!(
            events = selected,
            collections = groups.len(),
            "Uploading batch"
        );

        match self.net.send(&payload).await {
            Ok(response) => {
                let mut to_delete: Vec<EventId> = Vec::new();

                for (collection, events) in &groups {
                    let Some(statuses) = response.0.get(collection) else {
                        // No acknowledgment for this collection; keep its
                        // events pending rather than guess
                        tracing::warn!(
                            collection,
                            events = events.len(),
                            "Collection missing from acknowledgment, keeping events pending"
                        );
                        result.events_pending += events.len();
                        continue;
                    };

                    for (event, status) in events.iter().zip(statuses) {
                        if status.success {
                            result.events_sent += 1;
                            to_delete.push(event.id);
                        } else {
                            // Terminal per-event rejection: resubmitting the
                            // same body cannot succeed, so drop it
                            tracing::warn!(
                                collection,
                                event_id = event.id,
                                error = ?status.error,
                                "Event rejected by service, dropping"
                            );
                            result.events_dropped += 1;
                            to_delete.push(event.id);
                        }
                    }

                    if statuses.len() < events.len() {
                        result.events_pending += events.len() - statuses.len();
                    }
                }

                if let Err(e) = self.store.remove(&to_delete) {
                    // Deletion failure keeps delivered events pending; they
                    // will be resubmitted (at-least-once, never lost)
                    tracing::error!(error = %e, "Failed to delete delivered events");
                    result.error = Some(e.to_string());
                }
            }
            Err(e) if e.is_retryable() => {
                // Transient failure after retries: everything stays pending
                tracing::warn!(error = %e, events = selected, "Flush failed, events remain pending");
                result.events_pending = selected;
                result.error = Some(e.to_string());
            }
            Err(e) => {
                // Terminal failure: drop the batch rather than retry forever
                let ids: Vec<EventId> = groups
                    .values()
                    .flat_map(|events| events.iter().map(|e| e.id))
                    .collect();
                tracing::warn!(
                    error = %e,
                    dropped = ids.len(),
                    "Terminal API failure, dropping batch"
                );
                match self.store.remove(&ids) {
                    Ok(()) => result.events_dropped = ids.len(),
                    Err(remove_err) => {
                        tracing::error!(error = %remove_err, "Failed to drop rejected batch");
                        result.events_pending = ids.len();
                    }
                }
                result.error = Some(e.to_string());
            }
        }

        result
    }
}
