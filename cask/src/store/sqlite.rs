//! SQLite-backed blob store.
//!
//! One single-file embedded database holding one table of cache entries,
//! indexed by key. The connection runs in WAL mode and is owned by a mutex;
//! every call hops onto the blocking pool so the async caller never blocks
//! a runtime worker on disk I/O.
//!
//! # Timestamps
//!
//! `created_at` and `expires_at` are stored as Unix milliseconds. Expiry is
//! evaluated against the wall clock at read time; a read that observes an
//! expired row deletes it in the same call.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cask_core::{CacheError, CacheResult, ScopedKey, StorageError, Timestamp};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::BlobStore;

/// SQLite-backed implementation of [`BlobStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Open` if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let display = path.as_ref().display().to_string();
        let conn = Connection::open(path.as_ref()).map_err(|e| StorageError::Open {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        Self::init(conn).map_err(|e| {
            CacheError::from(StorageError::Open {
                path: display,
                reason: e.to_string(),
            })
        })
    }

    /// Open an in-memory database. Contents vanish when the store drops;
    /// useful for tests that still want real SQL semantics.
    pub fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Open {
            path: ":memory:".to_string(),
            reason: e.to_string(),
        })?;
        Self::init(conn).map_err(|e| {
            CacheError::from(StorageError::Open {
                path: ":memory:".to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        // WAL keeps readers unblocked during writes; a file-backed db
        // reports the new mode, an in-memory db stays in "memory" mode.
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key        TEXT PRIMARY KEY NOT NULL,
                value      BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            )",
            [],
        )?;
        debug!("sqlite store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> CacheResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::Transaction {
                reason: "connection lock poisoned".to_string(),
            })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| {
            CacheError::from(StorageError::Io {
                reason: format!("blocking task failed: {e}"),
            })
        })?
    }
}

fn query_err(e: rusqlite::Error) -> CacheError {
    StorageError::Query {
        reason: e.to_string(),
    }
    .into()
}

fn txn_err(e: rusqlite::Error) -> CacheError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
    .into()
}

fn decode_timestamp(millis: i64) -> CacheResult<Timestamp> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StorageError::Corrupt {
            reason: format!("timestamp out of range: {millis}"),
        }
        .into()
    })
}

/// Whether a row with this `expires_at` column is logically absent at `now`.
fn is_expired(expires_at: Option<i64>, now_millis: i64) -> bool {
    matches!(expires_at, Some(at) if at <= now_millis)
}

#[async_trait]
impl BlobStore for SqliteStore {
    async fn put(
        &self,
        key: &ScopedKey,
        value: &[u8],
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        let stored = key.as_stored().to_string();
        let value = value.to_vec();
        let expires = expires_at.map(|t| t.timestamp_millis());
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO cache_entries (key, value, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     created_at = excluded.created_at,
                     expires_at = excluded.expires_at",
                params![stored, value, now, expires],
            )
            .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &ScopedKey) -> CacheResult<Vec<u8>> {
        let stored = key.as_stored().to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let row: Option<(Vec<u8>, Option<i64>)> = conn
                .query_row(
                    "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                    params![stored],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(query_err)?;
            match row {
                Some((_, expires)) if is_expired(expires, now) => {
                    // Lazy eviction: the row is logically gone, drop it now.
                    conn.execute(
                        "DELETE FROM cache_entries WHERE key = ?1",
                        params![stored],
                    )
                    .map_err(query_err)?;
                    Err(CacheError::not_found(stored))
                }
                Some((value, _)) => Ok(value),
                None => Err(CacheError::not_found(stored)),
            }
        })
        .await
    }

    async fn created_at(&self, key: &ScopedKey) -> CacheResult<Option<Timestamp>> {
        let stored = key.as_stored().to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let row: Option<(i64, Option<i64>)> = conn
                .query_row(
                    "SELECT created_at, expires_at FROM cache_entries WHERE key = ?1",
                    params![stored],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(query_err)?;
            match row {
                Some((_, expires)) if is_expired(expires, now) => Ok(None),
                Some((created, _)) => Ok(Some(decode_timestamp(created)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn delete(&self, key: &ScopedKey) -> CacheResult<()> {
        let stored = key.as_stored().to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![stored])
                .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn delete_all(&self) -> CacheResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries", [])
                .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let mut stmt = conn
                .prepare(
                    "SELECT key FROM cache_entries
                     WHERE expires_at IS NULL OR expires_at > ?1",
                )
                .map_err(query_err)?;
            let keys = stmt
                .query_map(params![now], |row| row.get::<_, String>(0))
                .map_err(query_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_err)?;
            Ok(keys)
        })
        .await
    }

    async fn put_many(
        &self,
        entries: Vec<(ScopedKey, Vec<u8>)>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        let expires = expires_at.map(|t| t.timestamp_millis());
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let tx = conn.transaction().map_err(txn_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO cache_entries (key, value, created_at, expires_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(key) DO UPDATE SET
                             value = excluded.value,
                             created_at = excluded.created_at,
                             expires_at = excluded.expires_at",
                    )
                    .map_err(txn_err)?;
                for (key, value) in &entries {
                    stmt.execute(params![key.as_stored(), value, now, expires])
                        .map_err(txn_err)?;
                }
            }
            tx.commit().map_err(txn_err)?;
            Ok(())
        })
        .await
    }

    async fn get_many(&self, keys: &[ScopedKey]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let stored: Vec<String> = keys.iter().map(|k| k.as_stored().to_string()).collect();
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let tx = conn.transaction().map_err(txn_err)?;
            let mut found = HashMap::with_capacity(stored.len());
            {
                let mut stmt = tx
                    .prepare(
                        "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                    )
                    .map_err(txn_err)?;
                let mut purge = tx
                    .prepare("DELETE FROM cache_entries WHERE key = ?1")
                    .map_err(txn_err)?;
                for key in &stored {
                    let row: Option<(Vec<u8>, Option<i64>)> = stmt
                        .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                        .optional()
                        .map_err(txn_err)?;
                    match row {
                        Some((_, expires)) if is_expired(expires, now) => {
                            purge.execute(params![key]).map_err(txn_err)?;
                        }
                        Some((value, _)) => {
                            found.insert(key.clone(), value);
                        }
                        None => {}
                    }
                }
            }
            tx.commit().map_err(txn_err)?;
            Ok(found)
        })
        .await
    }

    async fn created_at_many(
        &self,
        keys: &[ScopedKey],
    ) -> CacheResult<HashMap<String, Timestamp>> {
        let stored: Vec<String> = keys.iter().map(|k| k.as_stored().to_string()).collect();
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let tx = conn.transaction().map_err(txn_err)?;
            let mut found = HashMap::with_capacity(stored.len());
            {
                let mut stmt = tx
                    .prepare(
                        "SELECT created_at, expires_at FROM cache_entries WHERE key = ?1",
                    )
                    .map_err(txn_err)?;
                for key in &stored {
                    let row: Option<(i64, Option<i64>)> = stmt
                        .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                        .optional()
                        .map_err(txn_err)?;
                    if let Some((created, expires)) = row {
                        if !is_expired(expires, now) {
                            found.insert(key.clone(), decode_timestamp(created)?);
                        }
                    }
                }
            }
            tx.commit().map_err(txn_err)?;
            Ok(found)
        })
        .await
    }

    async fn delete_many(&self, keys: &[ScopedKey]) -> CacheResult<()> {
        let stored: Vec<String> = keys.iter().map(|k| k.as_stored().to_string()).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(txn_err)?;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM cache_entries WHERE key = ?1")
                    .map_err(txn_err)?;
                for key in &stored {
                    stmt.execute(params![key]).map_err(txn_err)?;
                }
            }
            tx.commit().map_err(txn_err)?;
            Ok(())
        })
        .await
    }

    async fn compact(&self) -> CacheResult<()> {
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis();
            let purged = conn
                .execute(
                    "DELETE FROM cache_entries
                     WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )
                .map_err(query_err)?;
            if purged > 0 {
                debug!(purged, "purged expired rows before vacuum");
            }
            // VACUUM cannot run inside a transaction.
            conn.execute("VACUUM", []).map_err(|e| {
                warn!("vacuum failed: {e}");
                query_err(e)
            })?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.with_conn(move |conn| {
            // Push the WAL into the main database file. In-memory and
            // rollback-journal databases report this as a no-op row.
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .optional()
                .map_err(query_err)?;
            Ok(())
        })
        .await
    }
}
