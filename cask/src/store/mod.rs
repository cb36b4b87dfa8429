//! Persistent blob store contract and backends.
//!
//! A [`BlobStore`] is a durable table of `(key, value, created_at,
//! expires_at)` rows. Expired rows are logically absent from every read
//! path; physical removal may lag behind (see [`BlobStore::compact`]).
//!
//! # Bulk operations
//!
//! The `*_many` variants must batch inside a single transaction on the
//! backing engine rather than looping over the single-key calls. That is
//! the whole point of their existence: one transaction instead of N.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use cask_core::{CacheResult, ScopedKey, Timestamp};

/// Durable CRUD over cache entries, keyed by [`ScopedKey`].
///
/// Implementations must be thread-safe; a store handle is owned by exactly
/// one cache instance while that instance is active.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upsert an entry. Replaces any existing row for the key wholesale and
    /// stamps `created_at` with the current time.
    async fn put(
        &self,
        key: &ScopedKey,
        value: &[u8],
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()>;

    /// Fetch an entry's value.
    ///
    /// Fails with `KeyNotFound` when the key is absent or the row has
    /// expired. An expired row observed here is purged opportunistically.
    async fn get(&self, key: &ScopedKey) -> CacheResult<Vec<u8>>;

    /// The entry's write timestamp, or `None` when absent or expired.
    async fn created_at(&self, key: &ScopedKey) -> CacheResult<Option<Timestamp>>;

    /// Remove an entry. Succeeds as a no-op when absent.
    async fn delete(&self, key: &ScopedKey) -> CacheResult<()>;

    /// Remove all entries atomically from the caller's point of view.
    async fn delete_all(&self) -> CacheResult<()>;

    /// All live (non-expired) stored keys. Snapshot consistency only.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Upsert a batch in one transaction, sharing one expiration.
    async fn put_many(
        &self,
        entries: Vec<(ScopedKey, Vec<u8>)>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()>;

    /// Fetch a batch in one transaction.
    ///
    /// Returns a map from stored key to value; absent and expired keys are
    /// simply missing from the map.
    async fn get_many(&self, keys: &[ScopedKey]) -> CacheResult<HashMap<String, Vec<u8>>>;

    /// Fetch a batch of write timestamps in one transaction, keyed by
    /// stored key. Absent and expired keys are missing from the map.
    async fn created_at_many(
        &self,
        keys: &[ScopedKey],
    ) -> CacheResult<HashMap<String, Timestamp>>;

    /// Remove a batch in one transaction. Absent keys are ignored.
    async fn delete_many(&self, keys: &[ScopedKey]) -> CacheResult<()>;

    /// Purge expired rows and physically reclaim their space. Does not
    /// change the logical content of the store.
    async fn compact(&self) -> CacheResult<()>;

    /// Make all previously acknowledged writes durable before returning.
    async fn flush(&self) -> CacheResult<()>;
}
