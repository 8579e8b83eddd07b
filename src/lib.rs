//! # keen-client
//!
//! Durable event-capture and upload pipeline for an analytics service.
//!
//! This library provides:
//! - A local event queue persisted in an embedded SQLite store
//! - Validation and per-collection capping with FIFO eviction
//! - Batched HTTPS upload with at-least-once delivery
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through a local-first pipeline:
//! - **Capture:** `add_event` validates and persists synchronously; an event
//!   counts as pending only once it is durable
//! - **Flush:** a single-flight batcher snapshots pending events, uploads
//!   them, and deletes exactly the acknowledged ones
//! - **Retry:** transient network failures leave events pending; terminal
//!   rejections are dropped with a logged reason, never silently
//!
//! ## Example
//!
//! ```rust,no_run
//! use keen_client::{ClientConfig, KeenClient};
//! use serde_json::json;
//!
//! # async fn run() -> keen_client::Result<()> {
//! let config = ClientConfig::load()?;
//! let client = KeenClient::open(&config)?;
//!
//! client.add_event("purchases", json!({"item": "golden widget", "price": 49.99}))?;
//! let result = client.flush().await;
//! println!("sent {} events", result.events_sent);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::{AutoFlushHandle, KeenClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use event::{EventId, PendingEvent};
pub use net::{NetworkClient, NetworkError};
pub use store::{MemoryStore, SqliteStore, Store};
pub use upload::FlushResult;

// Public modules
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod net;
pub mod queue;
pub mod store;
pub mod upload;
