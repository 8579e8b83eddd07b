//! Upload Batcher
//!
//! Moves pending events from the Local Store to the remote service with
//! at-least-once semantics: events are deleted only after the service
//! acknowledges them, so duplicates are possible on retry but silent loss is
//! not.

mod batcher;

pub use batcher::{FlushResult, UploadBatcher};
