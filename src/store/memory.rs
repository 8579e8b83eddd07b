//! In-memory event store
//!
//! Used for testing and development without touching disk. Thread-safe via a
//! single RwLock, matching the single-writer discipline of the SQLite
//! backend. Provides no durability across restarts.

use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use crate::error::Result;
use crate::event::{EventId, PendingEvent};
use crate::store::Store;

/// In-memory store for testing
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, VecDeque<PendingEvent>>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn put(&self, collection: &str, body: &Value) -> Result<EventId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.write().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .push_back(PendingEvent {
                id,
                collection: collection.to_string(),
                body: body.clone(),
                queued_at: chrono::Utc::now(),
            });
        Ok(id)
    }

    fn list_pending(&self, max_per_collection: usize) -> Result<Vec<PendingEvent>> {
        let collections = self.collections.read().unwrap();
        let mut out = Vec::new();
        for events in collections.values() {
            out.extend(events.iter().take(max_per_collection).cloned());
        }
        Ok(out)
    }

    fn remove(&self, ids: &[EventId]) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        for events in collections.values_mut() {
            events.retain(|e| !ids.contains(&e.id));
        }
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<i64> {
        let collections = self.collections.read().unwrap();
        Ok(collections.get(collection).map_or(0, |e| e.len()) as i64)
    }

    fn total_pending(&self) -> Result<i64> {
        let collections = self.collections.read().unwrap();
        Ok(collections.values().map(|e| e.len() as i64).sum())
    }

    fn evict_oldest(&self, collection: &str, n: usize) -> Result<usize> {
        let mut collections = self.collections.write().unwrap();
        let Some(events) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let evicted = n.min(events.len());
        events.drain(..evicted);
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_and_count() {
        let store = MemoryStore::new();
        store.put("clicks", &json!({"n": 1})).unwrap();
        store.put("clicks", &json!({"n": 2})).unwrap();
        store.put("views", &json!({"page": "home"})).unwrap();

        assert_eq!(store.count("clicks").unwrap(), 2);
        assert_eq!(store.count("views").unwrap(), 1);
        assert_eq!(store.count("missing").unwrap(), 0);
        assert_eq!(store.total_pending().unwrap(), 3);
    }

    #[test]
    fn test_list_pending_insertion_order() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store.put("clicks", &json!({"n": n})).unwrap();
        }

        let pending = store.list_pending(10).unwrap();
        let ns: Vec<i64> = pending.iter().map(|e| e.body["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[test]
    fn test_evict_oldest() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store.put("clicks", &json!({"n": n})).unwrap();
        }

        assert_eq!(store.evict_oldest("clicks", 2).unwrap(), 2);
        let pending = store.list_pending(10).unwrap();
        assert_eq!(pending[0].body["n"], 2);

        // Eviction beyond the queue length clamps
        assert_eq!(store.evict_oldest("clicks", 100).unwrap(), 3);
        assert_eq!(store.count("clicks").unwrap(), 0);
    }
}
