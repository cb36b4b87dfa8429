//! In-memory blob store.
//!
//! A synchronized map satisfying the exact [`BlobStore`] contract. Used for
//! ephemeral caches and for deterministic tests of expiration and
//! concurrency behavior without disk I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cask_core::{CacheEntry, CacheError, CacheResult, ScopedKey, StorageError, Timestamp};
use chrono::Utc;

use super::BlobStore;

/// In-memory implementation of [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries.lock().map_err(|_| {
            StorageError::Transaction {
                reason: "entry map lock poisoned".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(
        &self,
        key: &ScopedKey,
        value: &[u8],
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        let mut entries = self.lock()?;
        entries.insert(
            key.as_stored().to_string(),
            CacheEntry {
                key: key.as_stored().to_string(),
                value: value.to_vec(),
                created_at: Utc::now(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &ScopedKey) -> CacheResult<Vec<u8>> {
        let now = Utc::now();
        let mut entries = self.lock()?;
        match entries.get(key.as_stored()) {
            Some(stored) if stored.is_expired(now) => {
                entries.remove(key.as_stored());
                Err(CacheError::not_found(key.as_stored()))
            }
            Some(stored) => Ok(stored.value.clone()),
            None => Err(CacheError::not_found(key.as_stored())),
        }
    }

    async fn created_at(&self, key: &ScopedKey) -> CacheResult<Option<Timestamp>> {
        let now = Utc::now();
        let entries = self.lock()?;
        Ok(entries
            .get(key.as_stored())
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.created_at))
    }

    async fn delete(&self, key: &ScopedKey) -> CacheResult<()> {
        self.lock()?.remove(key.as_stored());
        Ok(())
    }

    async fn delete_all(&self) -> CacheResult<()> {
        self.lock()?.clear();
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let now = Utc::now();
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .filter(|(_, stored)| !stored.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn put_many(
        &self,
        batch: Vec<(ScopedKey, Vec<u8>)>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        // One lock acquisition is this backend's "single transaction".
        let now = Utc::now();
        let mut entries = self.lock()?;
        for (key, value) in batch {
            entries.insert(
                key.as_stored().to_string(),
                CacheEntry {
                    key: key.as_stored().to_string(),
                    value,
                    created_at: now,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn get_many(&self, keys: &[ScopedKey]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let now = Utc::now();
        let mut entries = self.lock()?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            match entries.get(key.as_stored()) {
                Some(stored) if stored.is_expired(now) => {
                    entries.remove(key.as_stored());
                }
                Some(stored) => {
                    found.insert(key.as_stored().to_string(), stored.value.clone());
                }
                None => {}
            }
        }
        Ok(found)
    }

    async fn created_at_many(
        &self,
        keys: &[ScopedKey],
    ) -> CacheResult<HashMap<String, Timestamp>> {
        let now = Utc::now();
        let entries = self.lock()?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(stored) = entries.get(key.as_stored()) {
                if !stored.is_expired(now) {
                    found.insert(key.as_stored().to_string(), stored.created_at);
                }
            }
        }
        Ok(found)
    }

    async fn delete_many(&self, keys: &[ScopedKey]) -> CacheResult<()> {
        let mut entries = self.lock()?;
        for key in keys {
            entries.remove(key.as_stored());
        }
        Ok(())
    }

    async fn compact(&self) -> CacheResult<()> {
        let now = Utc::now();
        let mut entries = self.lock()?;
        entries.retain(|_, stored| !stored.is_expired(now));
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        // Nothing to make durable.
        Ok(())
    }
}
