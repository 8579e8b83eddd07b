//! Event Queue Manager
//!
//! Validates incoming events, merges global properties, enriches the
//! reserved `keen` namespace, and persists through the [`Store`]. Enforces
//! the per-collection pending cap by evicting oldest events (FIFO) after a
//! successful insert.
//!
//! `add` is the capture path: it never touches the network and only performs
//! fast local work, so callers can invoke it from latency-sensitive code.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::Mutex;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::{enrich_reserved, EventId};
use crate::store::Store;

/// Maximum length of a collection name
const MAX_COLLECTION_NAME_LEN: usize = 256;

/// Queue manager in front of the Local Store
pub struct EventQueue {
    store: Arc<dyn Store>,
    max_event_size_bytes: usize,
    max_pending_per_collection: usize,
    global_properties: Option<Map<String, Value>>,
    /// Serializes insert + cap enforcement so concurrent adds keep the
    /// per-collection count exact
    write_lock: Mutex<()>,
}

impl EventQueue {
    /// Create a queue over a store, taking limits from the configuration
    pub fn new(store: Arc<dyn Store>, config: &ClientConfig) -> Self {
        let global_properties = config
            .global_properties
            .as_ref()
            .and_then(|v| v.as_object())
            .cloned();

        Self {
            store,
            max_event_size_bytes: config.max_event_size_bytes,
            max_pending_per_collection: config.max_pending_per_collection,
            global_properties,
            write_lock: Mutex::new(()),
        }
    }

    /// Validate, enrich, and persist an event.
    ///
    /// Returns the assigned sequence id. On [`Error::Validation`] nothing was
    /// persisted. Once this returns `Ok`, the event is durable and pending
    /// upload.
    pub fn add(&self, collection: &str, body: Value) -> Result<EventId> {
        validate_collection_name(collection)?;

        let Value::Object(mut body) = body else {
            return Err(Error::Validation(format!(
                "event body for {:?} must be a JSON object",
                collection
            )));
        };

        // Global properties first; caller fields win on conflict
        if let Some(props) = &self.global_properties {
            for (key, value) in props {
                body.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        enrich_reserved(&mut body, chrono::Utc::now());

        let body = Value::Object(body);
        let serialized_len = serde_json::to_string(&body)?.len();
        if serialized_len > self.max_event_size_bytes {
            return Err(Error::Validation(format!(
                "event of {} bytes exceeds limit of {} bytes for {:?}",
                serialized_len, self.max_event_size_bytes, collection
            )));
        }

        let _guard = self.write_lock.lock().unwrap();

        let id = self.store.put(collection, &body)?;

        // Enforce the pending cap, oldest out first
        let count = self.store.count(collection)?;
        let cap = self.max_pending_per_collection as i64;
        if count > cap {
            let overflow = (count - cap) as usize;
            let evicted = self.store.evict_oldest(collection, overflow)?;
            tracing::warn!(
                collection,
                evicted,
                cap = self.max_pending_per_collection,
                "Pending cap exceeded, evicted oldest events"
            );
        }

        Ok(id)
    }

    /// Number of pending events in a collection
    pub fn count(&self, collection: &str) -> Result<i64> {
        self.store.count(collection)
    }
}

/// Validate a collection name against the service's naming rules
fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(
            "collection name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(Error::Validation(format!(
            "collection name exceeds {} characters",
            MAX_COLLECTION_NAME_LEN
        )));
    }
    if name.starts_with('$') {
        return Err(Error::Validation(format!(
            "collection name {:?} must not start with '$'",
            name
        )));
    }
    if name.contains('.') {
        return Err(Error::Validation(format!(
            "collection name {:?} must not contain '.'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn queue_with(config: ClientConfig) -> (Arc<MemoryStore>, EventQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = EventQueue::new(store.clone(), &config);
        (store, queue)
    }

    fn test_config() -> ClientConfig {
        ClientConfig::new("5f3e9b2c1a", "WRITE_KEY_ABC")
    }

    #[test]
    fn test_add_persists_enriched_event() {
        let (store, queue) = queue_with(test_config());

        queue.add("purchases", json!({"item": "widget"})).unwrap();

        let pending = store.list_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body["item"], "widget");
        assert!(pending[0].body["keen"]["id"].is_string());
        assert!(pending[0].body["keen"]["timestamp"].is_string());
    }

    #[test]
    fn test_invalid_collection_names_rejected() {
        let (store, queue) = queue_with(test_config());

        let too_long = "x".repeat(300);
        for name in ["", "$internal", "a.b", too_long.as_str()] {
            let err = queue.add(name, json!({"k": 1})).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "name {:?}", name);
        }

        // Nothing persisted
        assert_eq!(store.total_pending().unwrap(), 0);
    }

    #[test]
    fn test_non_object_body_rejected() {
        let (store, queue) = queue_with(test_config());

        let err = queue.add("clicks", json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.total_pending().unwrap(), 0);
    }

    #[test]
    fn test_oversized_event_rejected() {
        let config = ClientConfig {
            max_event_size_bytes: 128,
            ..test_config()
        };
        let (store, queue) = queue_with(config);

        let err = queue
            .add("clicks", json!({"blob": "x".repeat(500)}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.total_pending().unwrap(), 0);
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let config = ClientConfig {
            max_pending_per_collection: 3,
            ..test_config()
        };
        let (store, queue) = queue_with(config);

        for n in 0..5 {
            queue.add("clicks", json!({"n": n})).unwrap();
        }

        assert_eq!(store.count("clicks").unwrap(), 3);
        let pending = store.list_pending(10).unwrap();
        let ns: Vec<i64> = pending.iter().map(|e| e.body["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 3, 4]);
    }

    #[test]
    fn test_cap_applies_per_collection() {
        let config = ClientConfig {
            max_pending_per_collection: 2,
            ..test_config()
        };
        let (store, queue) = queue_with(config);

        for n in 0..4 {
            queue.add("clicks", json!({"n": n})).unwrap();
            queue.add("views", json!({"n": n})).unwrap();
        }

        assert_eq!(store.count("clicks").unwrap(), 2);
        assert_eq!(store.count("views").unwrap(), 2);
    }

    #[test]
    fn test_global_properties_merged_caller_wins() {
        let config = ClientConfig {
            global_properties: Some(json!({"app_version": "2.1.0", "item": "default"})),
            ..test_config()
        };
        let (store, queue) = queue_with(config);

        queue.add("purchases", json!({"item": "widget"})).unwrap();

        let pending = store.list_pending(10).unwrap();
        assert_eq!(pending[0].body["app_version"], "2.1.0");
        assert_eq!(pending[0].body["item"], "widget");
    }
}
