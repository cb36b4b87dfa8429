//! Named cache instance registry.
//!
//! Hosts that keep several logical caches (e.g. "local machine", "user
//! account", "secure") register them here and drive lifecycle through one
//! handle. The registry owns no global state: the host constructs it,
//! passes it around, and calls [`CacheRegistry::shutdown_all`] on exit,
//! which flushes and disposes every registered instance exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cask_core::{CacheError, CacheResult, StorageError, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::BlobCache;
use crate::crypto::Cipher;
use crate::store::BlobStore;

/// Boxed factory future used by [`DynCache::get_or_create`].
pub type BoxedValueFuture = Pin<Box<dyn Future<Output = CacheResult<Vec<u8>>> + Send + 'static>>;

/// Object-safe view of a cache: the raw-blob operations plus lifecycle.
///
/// Typed-object operations are generic and therefore live only on
/// [`BlobCache`] itself; fetch the concrete handle for those.
#[async_trait]
pub trait DynCache: Send + Sync {
    async fn insert(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()>;
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>>;
    async fn get_or_create(
        &self,
        key: &str,
        factory: Box<dyn FnOnce() -> BoxedValueFuture + Send + 'static>,
    ) -> CacheResult<Vec<u8>>;
    async fn created_at(&self, key: &str) -> CacheResult<Option<Timestamp>>;
    async fn invalidate(&self, key: &str) -> CacheResult<()>;
    async fn invalidate_all(&self) -> CacheResult<()>;
    async fn keys(&self) -> CacheResult<Vec<String>>;
    async fn flush(&self) -> CacheResult<()>;
    async fn vacuum(&self) -> CacheResult<()>;
    async fn dispose(&self) -> CacheResult<()>;
}

#[async_trait]
impl<S, C> DynCache for BlobCache<S, C>
where
    S: BlobStore + 'static,
    C: Cipher + 'static,
{
    async fn insert(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        BlobCache::insert(self, key, value, expires_at).await
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        BlobCache::get(self, key).await
    }

    async fn get_or_create(
        &self,
        key: &str,
        factory: Box<dyn FnOnce() -> BoxedValueFuture + Send + 'static>,
    ) -> CacheResult<Vec<u8>> {
        BlobCache::get_or_create(self, key, factory).await
    }

    async fn created_at(&self, key: &str) -> CacheResult<Option<Timestamp>> {
        BlobCache::created_at(self, key).await
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        BlobCache::invalidate(self, key).await
    }

    async fn invalidate_all(&self) -> CacheResult<()> {
        BlobCache::invalidate_all(self).await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        BlobCache::keys(self).await
    }

    async fn flush(&self) -> CacheResult<()> {
        BlobCache::flush(self).await
    }

    async fn vacuum(&self) -> CacheResult<()> {
        BlobCache::vacuum(self).await
    }

    async fn dispose(&self) -> CacheResult<()> {
        BlobCache::dispose(self).await
    }
}

/// Registry of named cache instances with one-shot shutdown.
#[derive(Default)]
pub struct CacheRegistry {
    caches: Mutex<HashMap<String, Arc<dyn DynCache>>>,
}

impl CacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache under `name`.
    ///
    /// Fails if the name is already taken; singletons stay singletons.
    pub fn register(&self, name: &str, cache: Arc<dyn DynCache>) -> CacheResult<()> {
        let mut caches = self.lock()?;
        if caches.contains_key(name) {
            return Err(CacheError::invalid_key(format!(
                "cache {name:?} is already registered"
            )));
        }
        caches.insert(name.to_string(), cache);
        Ok(())
    }

    /// Look up a registered cache by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DynCache>> {
        self.lock().ok()?.get(name).cloned()
    }

    /// Names of all registered caches.
    pub fn names(&self) -> Vec<String> {
        match self.lock() {
            Ok(caches) => caches.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Dispose every registered cache and empty the registry.
    ///
    /// Each instance's disposal flushes it first (per its config). All
    /// instances are attempted even if one fails; the first error wins.
    pub async fn shutdown_all(&self) -> CacheResult<()> {
        let drained: Vec<(String, Arc<dyn DynCache>)> = {
            let mut caches = self.lock()?;
            caches.drain().collect()
        };
        let mut first_error = None;
        for (name, cache) in drained {
            debug!(name = %name, "registry shutdown: disposing cache");
            if let Err(e) = cache.dispose().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(
        &self,
    ) -> CacheResult<std::sync::MutexGuard<'_, HashMap<String, Arc<dyn DynCache>>>> {
        self.caches.lock().map_err(|_| {
            StorageError::Transaction {
                reason: "registry lock poisoned".to_string(),
            }
            .into()
        })
    }
}

// Typed helpers for hosts that hold the registry but not the concrete
// cache type: serialize on the way in, deserialize on the way out.
impl CacheRegistry {
    /// Insert a typed object through a registered cache's raw interface.
    pub async fn insert_object<T: Serialize>(
        &self,
        cache_name: &str,
        key: &str,
        value: &T,
    ) -> CacheResult<()> {
        let cache = self.get(cache_name).ok_or_else(|| {
            CacheError::invalid_key(format!("no cache registered as {cache_name:?}"))
        })?;
        let bytes = crate::serializer::Serializer::default().to_bytes(value)?;
        cache.insert(key, bytes, None).await
    }

    /// Fetch a typed object through a registered cache's raw interface.
    pub async fn get_object<T: DeserializeOwned>(
        &self,
        cache_name: &str,
        key: &str,
    ) -> CacheResult<T> {
        let cache = self.get(cache_name).ok_or_else(|| {
            CacheError::invalid_key(format!("no cache registered as {cache_name:?}"))
        })?;
        let bytes = cache.get(key).await?;
        crate::serializer::Serializer::default().from_bytes(&bytes)
    }
}
