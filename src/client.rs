//! Client facade
//!
//! `KeenClient` wires the queue, store, batcher, and network client
//! together. It is an explicitly constructed value passed by reference (or
//! `Arc`), never process-wide shared state: callers choose the store and
//! transport, which is also how tests substitute in-memory and mock
//! backends.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::event::EventId;
use crate::net::{HttpNetworkClient, NetworkClient};
use crate::queue::EventQueue;
use crate::store::{SqliteStore, Store};
use crate::upload::{FlushResult, UploadBatcher};

/// Analytics client: durable local event queue with batched upload
pub struct KeenClient {
    queue: EventQueue,
    batcher: UploadBatcher,
    store: Arc<dyn Store>,
    flush_interval: Duration,
}

impl KeenClient {
    /// Construct a client from its parts.
    ///
    /// The store and network client are injected, so any [`Store`] and
    /// [`NetworkClient`] implementation works here.
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn Store>,
        net: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            queue: EventQueue::new(store.clone(), config),
            batcher: UploadBatcher::new(store.clone(), net, config.flush_batch_size),
            store,
            flush_interval: Duration::from_secs(config.flush_interval_secs),
        })
    }

    /// Construct a production client: SQLite store at the configured path,
    /// HTTPS transport.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&ClientConfig::database_path())?);
        let net = Arc::new(HttpNetworkClient::new(config)?);
        Self::new(config, store, net)
    }

    /// Capture an event into a collection.
    ///
    /// Validates, persists, and returns the local sequence id. This is a
    /// fast local call; it never waits on network I/O.
    pub fn add_event(&self, collection: &str, body: serde_json::Value) -> Result<EventId> {
        self.queue.add(collection, body)
    }

    /// Upload pending events.
    ///
    /// At most one flush runs at a time; concurrent calls coalesce onto the
    /// in-flight result.
    pub async fn flush(&self) -> FlushResult {
        self.batcher.flush().await
    }

    /// Number of pending events in a collection
    pub fn pending_count(&self, collection: &str) -> Result<i64> {
        self.store.count(collection)
    }

    /// Number of pending events across all collections
    pub fn total_pending(&self) -> Result<i64> {
        self.store.total_pending()
    }

    /// Start a background task that flushes on the configured interval.
    ///
    /// Returns a handle to stop it. Stopping (or dropping the handle at
    /// process shutdown) abandons any in-flight flush; unacknowledged events
    /// simply stay in the store for the next flush.
    pub fn start_auto_flush(self: &Arc<Self>) -> AutoFlushHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let client = Arc::clone(self);
        let interval = client.flush_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so a fresh client does
            // not flush an empty store right away
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = client.flush().await;
                        if result.events_sent > 0 || result.error.is_some() {
                            tracing::debug!(
                                sent = result.events_sent,
                                dropped = result.events_dropped,
                                pending = result.events_pending,
                                error = result.error.as_deref(),
                                "Auto-flush completed"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Auto-flush stopping");
                        break;
                    }
                }
            }
        });

        AutoFlushHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle for the background auto-flush task
pub struct AutoFlushHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AutoFlushHandle {
    /// Signal the task to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Signal the task to stop without waiting
    pub fn abort(self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}
