//! Local Store for pending events
//!
//! The store is the durability boundary of the pipeline: an event counts as
//! "pending upload" only once `put` has returned. Two backends implement the
//! [`Store`] trait:
//!
//! - [`SqliteStore`](sqlite::SqliteStore): the production backend on an
//!   embedded SQLite engine (WAL mode, survives process restart)
//! - [`MemoryStore`](memory::MemoryStore): for tests and development
//!
//! All store operations are synchronous fast-local calls; mutations serialize
//! through the backend's single writer lock so a flush snapshot always sees a
//! consistent pending set.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::event::{EventId, PendingEvent};
use serde_json::Value;

/// Storage interface for the event queue.
///
/// Implementations must be internally synchronized: each method is atomic
/// with respect to the others.
pub trait Store: Send + Sync {
    /// Persist an event body under a collection, returning its sequence id.
    ///
    /// The event is durable once this returns.
    fn put(&self, collection: &str, body: &Value) -> Result<EventId>;

    /// Snapshot pending events, oldest first within each collection, at most
    /// `max_per_collection` from each.
    fn list_pending(&self, max_per_collection: usize) -> Result<Vec<PendingEvent>>;

    /// Delete events by id. Unknown ids are ignored.
    fn remove(&self, ids: &[EventId]) -> Result<()>;

    /// Number of pending events in a collection.
    fn count(&self, collection: &str) -> Result<i64>;

    /// Number of pending events across all collections.
    fn total_pending(&self) -> Result<i64>;

    /// Delete the `n` oldest events in a collection, returning how many were
    /// actually deleted.
    fn evict_oldest(&self, collection: &str, n: usize) -> Result<usize>;
}
