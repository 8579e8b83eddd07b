//! Integration tests for the capture-and-flush pipeline
//!
//! These tests exercise the end-to-end flow: events added through the client
//! land in the store, and flushing moves exactly the acknowledged events to
//! a (scripted) network client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use keen_client::net::{BatchPayload, BatchResponse, NetworkError};
use keen_client::{ClientConfig, KeenClient, MemoryStore, NetworkClient, SqliteStore};

/// Scripted outcome for one network call
#[derive(Clone)]
enum Outcome {
    AcceptAll,
    Retryable,
    Terminal,
}

/// Mock network client: records every payload and plays back a script of
/// outcomes (repeating the last entry once exhausted).
struct MockNetworkClient {
    calls: Mutex<Vec<BatchPayload>>,
    script: Mutex<VecDeque<Outcome>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl MockNetworkClient {
    fn accepting() -> Self {
        Self::scripted(vec![Outcome::AcceptAll])
    }

    fn scripted(outcomes: Vec<Outcome>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(outcomes.into_iter().collect()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NetworkClient for MockNetworkClient {
    async fn send(&self, payload: &BatchPayload) -> Result<BatchResponse, NetworkError> {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

        self.calls.lock().unwrap().push(payload.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or(Outcome::AcceptAll)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Outcome::AcceptAll => Ok(BatchResponse::all_success(payload)),
            Outcome::Retryable => Err(NetworkError::Retryable("gateway timeout".to_string())),
            Outcome::Terminal => Err(NetworkError::Terminal {
                status: 422,
                message: "unprocessable batch".to_string(),
            }),
        }
    }
}

fn test_config() -> ClientConfig {
    ClientConfig::new("5f3e9b2c1a", "WRITE_KEY_ABC")
}

fn memory_client(net: Arc<MockNetworkClient>) -> KeenClient {
    KeenClient::new(&test_config(), Arc::new(MemoryStore::new()), net).unwrap()
}

// ============================================
// End-to-end scenario
// ============================================

#[tokio::test]
async fn test_three_purchases_flush_in_order() {
    let net = Arc::new(MockNetworkClient::accepting());
    let client = memory_client(net.clone());

    client.add_event("purchases", json!({"item": "one"})).unwrap();
    client.add_event("purchases", json!({"item": "two"})).unwrap();
    client.add_event("purchases", json!({"item": "three"})).unwrap();

    let result = client.flush().await;

    assert_eq!(result.events_sent, 3);
    assert_eq!(client.pending_count("purchases").unwrap(), 0);

    // One network call carrying all 3 events in insertion order
    let calls = net.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let purchases = &calls[0].0["purchases"];
    assert_eq!(purchases.len(), 3);
    assert_eq!(purchases[0]["item"], "one");
    assert_eq!(purchases[1]["item"], "two");
    assert_eq!(purchases[2]["item"], "three");
    // Capture enrichment travels with the events
    assert!(purchases[0]["keen"]["id"].is_string());
}

// ============================================
// Durability
// ============================================

#[tokio::test]
async fn test_events_survive_restart_then_flush() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.db");
    let config = test_config();

    // First "process": capture, no flush, drop everything
    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let client =
            KeenClient::new(&config, store, Arc::new(MockNetworkClient::accepting())).unwrap();
        client.add_event("signups", json!({"plan": "free"})).unwrap();
        client.add_event("signups", json!({"plan": "pro"})).unwrap();
    }

    // Second "process": pending events are still there and flush cleanly
    let net = Arc::new(MockNetworkClient::accepting());
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let client = KeenClient::new(&config, store, net.clone()).unwrap();

    assert_eq!(client.pending_count("signups").unwrap(), 2);
    let result = client.flush().await;
    assert_eq!(result.events_sent, 2);
    assert_eq!(client.pending_count("signups").unwrap(), 0);
}

// ============================================
// Failure handling
// ============================================

#[tokio::test]
async fn test_network_failure_leaves_events_pending() {
    let net = Arc::new(MockNetworkClient::scripted(vec![
        Outcome::Retryable,
        Outcome::AcceptAll,
    ]));
    let client = memory_client(net.clone());

    client.add_event("purchases", json!({"item": "widget"})).unwrap();
    client.add_event("views", json!({"page": "pricing"})).unwrap();

    let result = client.flush().await;
    assert_eq!(result.events_sent, 0);
    assert_eq!(result.events_pending, 2);
    assert!(result.error.is_some());

    // No premature deletion
    assert_eq!(client.pending_count("purchases").unwrap(), 1);
    assert_eq!(client.pending_count("views").unwrap(), 1);

    // A later flush delivers the same events
    let result = client.flush().await;
    assert_eq!(result.events_sent, 2);
    assert_eq!(client.total_pending().unwrap(), 0);
}

#[tokio::test]
async fn test_terminal_failure_drops_batch_but_keeps_later_events() {
    let net = Arc::new(MockNetworkClient::scripted(vec![
        Outcome::Terminal,
        Outcome::AcceptAll,
    ]));
    let client = memory_client(net.clone());

    client.add_event("purchases", json!({"item": "bad"})).unwrap();
    let result = client.flush().await;
    assert_eq!(result.events_dropped, 1);
    assert!(result.error.is_some());
    assert_eq!(client.pending_count("purchases").unwrap(), 0);

    // The queue keeps working afterwards
    client.add_event("purchases", json!({"item": "good"})).unwrap();
    let result = client.flush().await;
    assert_eq!(result.events_sent, 1);
}

// ============================================
// Capping
// ============================================

#[tokio::test]
async fn test_cap_bounds_storage_and_evicts_oldest() {
    let config = ClientConfig {
        max_pending_per_collection: 4,
        ..test_config()
    };
    let net = Arc::new(MockNetworkClient::accepting());
    let client = KeenClient::new(&config, Arc::new(MemoryStore::new()), net.clone()).unwrap();

    for n in 0..10 {
        client.add_event("clicks", json!({"n": n})).unwrap();
    }

    assert_eq!(client.pending_count("clicks").unwrap(), 4);

    // Oldest were evicted; the survivors are the newest four, in order
    client.flush().await;
    let calls = net.calls.lock().unwrap();
    let clicks = &calls[0].0["clicks"];
    let ns: Vec<i64> = clicks.iter().map(|e| e["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, vec![6, 7, 8, 9]);
}

// ============================================
// Flush coalescing
// ============================================

#[tokio::test]
async fn test_concurrent_flushes_coalesce_to_one_network_call() {
    let net = Arc::new(
        MockNetworkClient::accepting().with_delay(Duration::from_millis(100)),
    );
    let client = Arc::new(memory_client(net.clone()));

    for n in 0..3 {
        client.add_event("purchases", json!({"n": n})).unwrap();
    }

    let a = tokio::spawn({
        let client = client.clone();
        async move { client.flush().await }
    });
    // Let the first flush reach the (slow) network call before the second
    // request arrives
    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = client.flush().await;
    let a = a.await.unwrap();

    // Single effective flush: one network call, never two in flight
    assert_eq!(net.call_count(), 1);
    assert_eq!(net.max_in_flight.load(Ordering::SeqCst), 1);

    // Exactly one of the two was the leader; both report the same delivery
    assert!(a.coalesced ^ b.coalesced);
    assert_eq!(a.events_sent, 3);
    assert_eq!(b.events_sent, 3);
    assert_eq!(client.pending_count("purchases").unwrap(), 0);
}

#[tokio::test]
async fn test_flush_after_flush_runs_again() {
    let net = Arc::new(MockNetworkClient::accepting());
    let client = memory_client(net.clone());

    client.add_event("clicks", json!({"n": 1})).unwrap();
    client.flush().await;
    client.add_event("clicks", json!({"n": 2})).unwrap();
    client.flush().await;

    // Sequential flushes are not coalesced
    assert_eq!(net.call_count(), 2);
    assert_eq!(client.total_pending().unwrap(), 0);
}
