//! SQLite-backed event store
//!
//! Production backend on the bundled SQLite engine. A single mutexed
//! connection gives the single-writer discipline the queue relies on: every
//! mutation and every flush snapshot serializes through the same lock.
//!
//! Corruption is never silent. When a statement fails with a corruption
//! error, the store file is discarded, a fresh schema is created in place,
//! and the failing caller gets [`Error::Corruption`] carrying the pending
//! count that was lost. The store stays usable for subsequent calls.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::{EventId, PendingEvent};
use crate::store::{schema, Store};

/// Durable event store on an embedded SQLite database
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    /// None for in-memory stores
    path: Option<PathBuf>,
    /// Cheap pending-count shadow, kept so corruption can report how many
    /// events were lost when the file is no longer queryable
    pending: AtomicI64,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// If the existing file is corrupt it is re-initialized empty and this
    /// returns [`Error::Corruption`]; a second `open` on the same path will
    /// then succeed on the fresh store.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open_connection(Some(path)) {
            Ok(conn) => Self::finish_open(conn, Some(path.to_path_buf())),
            Err(Error::Storage(e)) if is_corruption(&e) => {
                tracing::error!(path = %path.display(), "Store file corrupt, re-initializing");
                remove_store_files(path);
                // Recreate so the path holds a valid empty store, but report
                // the loss rather than silently handing out an empty store.
                let _ = Self::open_connection(Some(path))?;
                Err(Error::Corruption(format!(
                    "store file {:?} was corrupt; re-initialized empty, all pending events lost",
                    path
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Open an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Self::open_connection(None)?;
        Self::finish_open(conn, None)
    }

    fn finish_open(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        let pending: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            pending: AtomicI64::new(pending),
        })
    }

    /// Open a connection, apply pragmas, and migrate to the current schema
    fn open_connection(path: Option<&Path>) -> Result<Connection> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };

        // WAL + synchronous=NORMAL: inserts are atomic and survive process
        // crash, without paying a full fsync per event
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        schema::run_migrations(&conn)?;
        Ok(conn)
    }

    /// Run a statement against the connection, translating corruption
    /// failures into an in-place re-initialization plus a reported error.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        match f(&mut conn) {
            Ok(v) => Ok(v),
            Err(e) if is_corruption(&e) => {
                let lost = self.pending.swap(0, Ordering::SeqCst);
                tracing::error!(
                    events_lost = lost,
                    "Store corrupted during operation, re-initializing"
                );
                if let Some(path) = &self.path {
                    remove_store_files(path);
                }
                match Self::open_connection(self.path.as_deref()) {
                    Ok(fresh) => {
                        *conn = fresh;
                        Err(Error::Corruption(format!(
                            "store re-initialized, {} pending events lost",
                            lost
                        )))
                    }
                    Err(reopen_err) => Err(reopen_err),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Store for SqliteStore {
    fn put(&self, collection: &str, body: &Value) -> Result<EventId> {
        let body_json = serde_json::to_string(body)?;
        let queued_at = Utc::now().to_rfc3339();

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (collection, body, queued_at) VALUES (?1, ?2, ?3)",
                params![collection, body_json, queued_at],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn list_pending(&self, max_per_collection: usize) -> Result<Vec<PendingEvent>> {
        let rows: Vec<(EventId, String, String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, collection, body, queued_at FROM (
                    SELECT id, collection, body, queued_at,
                           ROW_NUMBER() OVER (PARTITION BY collection ORDER BY id) AS rn
                    FROM events
                )
                WHERE rn <= ?1
                ORDER BY collection, id
                "#,
            )?;

            let rows = stmt.query_map([max_per_collection as i64], |row| {
                Ok((
                    row.get("id")?,
                    row.get("collection")?,
                    row.get("body")?,
                    row.get("queued_at")?,
                ))
            })?;

            rows.collect()
        })?;

        // A row that no longer decodes is localized corruption. Skip it
        // with a logged count rather than serve fabricated content that a
        // flush would then upload and delete in place of the original.
        let mut pending = Vec::with_capacity(rows.len());
        let mut undecodable = 0usize;

        for (id, collection, body_json, queued_at_str) in rows {
            let body = match serde_json::from_str(&body_json) {
                Ok(body) => body,
                Err(e) => {
                    undecodable += 1;
                    tracing::warn!(
                        event_id = id,
                        collection = %collection,
                        error = %e,
                        "Stored event body failed to decode, skipping row"
                    );
                    continue;
                }
            };
            let queued_at = match DateTime::parse_from_rfc3339(&queued_at_str) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    undecodable += 1;
                    tracing::warn!(
                        event_id = id,
                        collection = %collection,
                        error = %e,
                        "Stored event timestamp failed to decode, skipping row"
                    );
                    continue;
                }
            };
            pending.push(PendingEvent {
                id,
                collection,
                body,
                queued_at,
            });
        }

        if undecodable > 0 {
            tracing::warn!(undecodable, "Skipped undecodable rows in pending snapshot");
        }

        Ok(pending)
    }

    fn remove(&self, ids: &[EventId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let deleted = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0i64;
            {
                let mut stmt = tx.prepare("DELETE FROM events WHERE id = ?1")?;
                for id in ids {
                    deleted += stmt.execute(params![id])? as i64;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })?;

        self.pending.fetch_sub(deleted, Ordering::SeqCst);
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM events WHERE collection = ?1",
                [collection],
                |r| r.get(0),
            )
        })
    }

    fn total_pending(&self) -> Result<i64> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0)))
    }

    fn evict_oldest(&self, collection: &str, n: usize) -> Result<usize> {
        let evicted = self.with_conn(|conn| {
            conn.execute(
                r#"
                DELETE FROM events WHERE id IN (
                    SELECT id FROM events WHERE collection = ?1 ORDER BY id LIMIT ?2
                )
                "#,
                params![collection, n as i64],
            )
        })?;

        self.pending.fetch_sub(evicted as i64, Ordering::SeqCst);
        Ok(evicted)
    }
}

/// Check whether a rusqlite error indicates file corruption
fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

/// Best-effort removal of a store file and its WAL siblings
fn remove_store_files(path: &Path) {
    let _ = std::fs::remove_file(path);
    for suffix in ["-wal", "-shm"] {
        let mut sibling = path.as_os_str().to_os_string();
        sibling.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(sibling));
    }
}
