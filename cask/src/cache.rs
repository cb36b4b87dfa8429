//! The blob cache façade.
//!
//! `BlobCache` combines a [`BlobStore`], a [`Cipher`], the serializer, and
//! the keyed operation queue into the single public entry point. Every
//! operation is routed through the queue on its key's lane (queue-wide
//! operations share the default lane), so mutations on one key are FIFO
//! while unrelated keys proceed in parallel.
//!
//! # Lifecycle
//!
//! `Active -> Disposing -> Disposed`. Disposal drains queued work, flushes
//! the store, then releases it. Every operation submitted at or after the
//! start of disposal fails with `Disposed` - uniformly, on every backend.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use cask_core::{
    CacheConfig, CacheError, CacheResult, ScopedKey, SerializerConfig, Timestamp, DEFAULT_LANE,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::crypto::{Cipher, NullCipher};
use crate::queue::KeyedQueue;
use crate::serializer::Serializer;
use crate::store::{BlobStore, MemoryStore, SqliteStore};

const ACTIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// Embedded asynchronous persistent blob cache.
///
/// Cheap to clone; clones share the same store, cipher, queue, and
/// lifecycle state.
///
/// # Example
///
/// ```ignore
/// let cache = BlobCache::in_memory();
/// cache.insert("greeting", b"hello".to_vec(), None).await?;
/// let bytes = cache.get("greeting").await?;
/// cache.dispose().await?;
/// ```
pub struct BlobCache<S: BlobStore, C: Cipher = NullCipher> {
    store: Arc<S>,
    cipher: Arc<C>,
    serializer: Serializer,
    queue: Arc<KeyedQueue>,
    state: Arc<AtomicU8>,
    disposed_tx: Arc<watch::Sender<bool>>,
    config: CacheConfig,
}

impl<S: BlobStore, C: Cipher> Clone for BlobCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cipher: Arc::clone(&self.cipher),
            serializer: self.serializer,
            queue: Arc::clone(&self.queue),
            state: Arc::clone(&self.state),
            disposed_tx: Arc::clone(&self.disposed_tx),
            config: self.config.clone(),
        }
    }
}

impl BlobCache<SqliteStore, NullCipher> {
    /// Open (or create) a SQLite-backed cache at `path` with no encryption.
    pub async fn open<P: AsRef<Path>>(path: P, config: CacheConfig) -> CacheResult<Self> {
        let store = SqliteStore::open(path)?;
        if config.purge_expired_on_open {
            store.compact().await?;
        }
        Ok(Self::new(store, NullCipher, config))
    }
}

impl BlobCache<MemoryStore, NullCipher> {
    /// Create an ephemeral, unencrypted cache for tests and scratch data.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), NullCipher, CacheConfig::default())
    }
}

impl<S, C> BlobCache<S, C>
where
    S: BlobStore + 'static,
    C: Cipher + 'static,
{
    /// Build a cache from its parts. The store handle becomes exclusively
    /// owned by this cache instance (and its clones) until disposal.
    pub fn new(store: S, cipher: C, config: CacheConfig) -> Self {
        let (disposed_tx, _) = watch::channel(false);
        Self {
            store: Arc::new(store),
            cipher: Arc::new(cipher),
            serializer: Serializer::default(),
            queue: Arc::new(KeyedQueue::new()),
            state: Arc::new(AtomicU8::new(ACTIVE)),
            disposed_tx: Arc::new(disposed_tx),
            config,
        }
    }

    /// Replace the serializer configuration (builder style).
    pub fn with_serializer_config(mut self, config: SerializerConfig) -> Self {
        self.serializer = Serializer::new(config);
        self
    }

    fn ensure_active(&self) -> CacheResult<()> {
        match self.state.load(Ordering::SeqCst) {
            ACTIVE => Ok(()),
            _ => Err(CacheError::Disposed),
        }
    }

    // ------------------------------------------------------------------
    // Raw-blob operations
    // ------------------------------------------------------------------

    /// Store bytes under `key`, replacing any previous value.
    pub async fn insert(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        self.ensure_active()?;
        self.insert_scoped(ScopedKey::raw(key)?, value, expires_at)
            .await
    }

    /// Fetch the bytes stored under `key`.
    ///
    /// Fails with `KeyNotFound` when the key is absent or expired.
    pub async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.ensure_active()?;
        self.get_scoped(ScopedKey::raw(key)?).await
    }

    /// Return the cached value, or run `factory` exactly once to produce,
    /// store, and return it.
    ///
    /// Concurrent callers for the same key coalesce behind the key's lane:
    /// the first queued operation fills the cache and the rest observe the
    /// stored value. A factory failure propagates to its caller and writes
    /// nothing.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> CacheResult<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<Vec<u8>>> + Send + 'static,
    {
        self.ensure_active()?;
        let key = ScopedKey::raw(key)?;
        let lane = key.lane().to_string();
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        self.queue
            .enqueue(&lane, move || async move {
                match store.get(&key).await {
                    Ok(encrypted) => cipher.decrypt(encrypted).await,
                    Err(CacheError::KeyNotFound { .. }) => {
                        let value = factory().await?;
                        let encrypted = cipher.encrypt(value.clone()).await?;
                        store.put(&key, &encrypted, None).await?;
                        Ok(value)
                    }
                    Err(other) => Err(other),
                }
            })
            .await
    }

    /// Write timestamp of the entry under `key`; `None` when absent or
    /// expired.
    pub async fn created_at(&self, key: &str) -> CacheResult<Option<Timestamp>> {
        self.ensure_active()?;
        self.created_at_scoped(ScopedKey::raw(key)?).await
    }

    /// Remove the entry under `key`. No-op when absent.
    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.ensure_active()?;
        self.invalidate_scoped(ScopedKey::raw(key)?).await
    }

    /// Remove every entry, raw and typed alike.
    pub async fn invalidate_all(&self) -> CacheResult<()> {
        self.ensure_active()?;
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move { store.delete_all().await })
            .await
    }

    /// All live raw-namespace keys.
    pub async fn keys(&self) -> CacheResult<Vec<String>> {
        self.ensure_active()?;
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                let stored = store.keys().await?;
                Ok(stored
                    .into_iter()
                    .filter(|key| ScopedKey::split_stored(key).0.is_none())
                    .collect())
            })
            .await
    }

    /// Force acknowledged writes onto stable storage.
    pub async fn flush(&self) -> CacheResult<()> {
        self.ensure_active()?;
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move { store.flush().await })
            .await
    }

    /// Purge expired rows and reclaim their space.
    pub async fn vacuum(&self) -> CacheResult<()> {
        self.ensure_active()?;
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move { store.compact().await })
            .await
    }

    // ------------------------------------------------------------------
    // Bulk operations (one store transaction per call)
    // ------------------------------------------------------------------

    /// Insert a batch of raw entries in a single store transaction.
    pub async fn insert_many(
        &self,
        entries: HashMap<String, Vec<u8>>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        self.ensure_active()?;
        let mut scoped = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            scoped.push((ScopedKey::raw(&key)?, value));
        }
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                let mut encrypted = Vec::with_capacity(scoped.len());
                for (key, value) in scoped {
                    encrypted.push((key, cipher.encrypt(value).await?));
                }
                store.put_many(encrypted, expires_at).await
            })
            .await
    }

    /// Fetch a batch of raw entries in a single store transaction.
    ///
    /// Absent and expired keys are missing from the result map.
    pub async fn get_many(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        self.ensure_active()?;
        let scoped = keys
            .iter()
            .map(|key| ScopedKey::raw(key))
            .collect::<CacheResult<Vec<_>>>()?;
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                let found = store.get_many(&scoped).await?;
                let mut decrypted = HashMap::with_capacity(found.len());
                for (key, value) in found {
                    decrypted.insert(key, cipher.decrypt(value).await?);
                }
                Ok(decrypted)
            })
            .await
    }

    /// Fetch write timestamps for a batch of raw keys.
    pub async fn created_at_many(
        &self,
        keys: &[String],
    ) -> CacheResult<HashMap<String, Timestamp>> {
        self.ensure_active()?;
        let scoped = keys
            .iter()
            .map(|key| ScopedKey::raw(key))
            .collect::<CacheResult<Vec<_>>>()?;
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                store.created_at_many(&scoped).await
            })
            .await
    }

    /// Remove a batch of raw keys in a single store transaction.
    pub async fn invalidate_many(&self, keys: &[String]) -> CacheResult<()> {
        self.ensure_active()?;
        let scoped = keys
            .iter()
            .map(|key| ScopedKey::raw(key))
            .collect::<CacheResult<Vec<_>>>()?;
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                store.delete_many(&scoped).await
            })
            .await
    }

    // ------------------------------------------------------------------
    // Typed-object operations
    // ------------------------------------------------------------------

    /// Serialize `value` and store it in `T`'s key namespace.
    pub async fn insert_object<T>(
        &self,
        key: &str,
        value: &T,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()>
    where
        T: Serialize,
    {
        self.ensure_active()?;
        let bytes = self.serializer.to_bytes(value)?;
        self.insert_scoped(ScopedKey::typed::<T>(key)?, bytes, expires_at)
            .await
    }

    /// Fetch and decode the object stored under `key` in `T`'s namespace.
    pub async fn get_object<T>(&self, key: &str) -> CacheResult<T>
    where
        T: DeserializeOwned,
    {
        self.ensure_active()?;
        let bytes = self
            .get_scoped(ScopedKey::typed::<T>(key)?)
            .await
            .map_err(|e| remap_not_found(e, key))?;
        self.serializer.from_bytes(&bytes)
    }

    /// Typed mirror of [`BlobCache::get_or_create`].
    pub async fn get_or_create_object<T, F, Fut>(&self, key: &str, factory: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        self.ensure_active()?;
        let scoped = ScopedKey::typed::<T>(key)?;
        let lane = scoped.lane().to_string();
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        let serializer = self.serializer;
        self.queue
            .enqueue(&lane, move || async move {
                match store.get(&scoped).await {
                    Ok(encrypted) => {
                        let bytes = cipher.decrypt(encrypted).await?;
                        serializer.from_bytes(&bytes)
                    }
                    Err(CacheError::KeyNotFound { .. }) => {
                        let value = factory().await?;
                        let bytes = serializer.to_bytes(&value)?;
                        let encrypted = cipher.encrypt(bytes).await?;
                        store.put(&scoped, &encrypted, None).await?;
                        Ok(value)
                    }
                    Err(other) => Err(other),
                }
            })
            .await
    }

    /// Write timestamp of the object under `key` in `T`'s namespace.
    pub async fn object_created_at<T>(&self, key: &str) -> CacheResult<Option<Timestamp>> {
        self.ensure_active()?;
        self.created_at_scoped(ScopedKey::typed::<T>(key)?).await
    }

    /// Remove the object under `key` in `T`'s namespace.
    pub async fn invalidate_object<T>(&self, key: &str) -> CacheResult<()> {
        self.ensure_active()?;
        self.invalidate_scoped(ScopedKey::typed::<T>(key)?).await
    }

    /// All live user keys in `T`'s namespace.
    pub async fn object_keys<T>(&self) -> CacheResult<Vec<String>> {
        self.ensure_active()?;
        let tag = cask_core::type_tag::<T>();
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                let stored = store.keys().await?;
                Ok(stored
                    .iter()
                    .filter_map(|key| match ScopedKey::split_stored(key) {
                        (Some(t), user) if t == tag => Some(user.to_string()),
                        _ => None,
                    })
                    .collect())
            })
            .await
    }

    /// Insert a batch of objects in a single store transaction.
    pub async fn insert_objects<T>(
        &self,
        entries: HashMap<String, T>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()>
    where
        T: Serialize,
    {
        self.ensure_active()?;
        let mut scoped = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            scoped.push((ScopedKey::typed::<T>(key)?, self.serializer.to_bytes(value)?));
        }
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                let mut encrypted = Vec::with_capacity(scoped.len());
                for (key, bytes) in scoped {
                    encrypted.push((key, cipher.encrypt(bytes).await?));
                }
                store.put_many(encrypted, expires_at).await
            })
            .await
    }

    /// Fetch and decode a batch of objects in a single store transaction,
    /// keyed by user key. Absent and expired keys are missing from the map.
    pub async fn get_objects<T>(&self, keys: &[String]) -> CacheResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.ensure_active()?;
        let scoped = keys
            .iter()
            .map(|key| ScopedKey::typed::<T>(key))
            .collect::<CacheResult<Vec<_>>>()?;
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        let serializer = self.serializer;
        self.queue
            .enqueue(DEFAULT_LANE, move || async move {
                let found = store.get_many(&scoped).await?;
                let mut decoded = HashMap::with_capacity(found.len());
                for (stored, value) in found {
                    let bytes = cipher.decrypt(value).await?;
                    let (_, user) = ScopedKey::split_stored(&stored);
                    decoded.insert(user.to_string(), serializer.from_bytes(&bytes)?);
                }
                Ok(decoded)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drain queued operations, flush the store, and release it.
    ///
    /// Idempotent; concurrent and repeated calls await the same drain.
    /// After the first call starts, every other operation fails with
    /// `Disposed`.
    pub async fn dispose(&self) -> CacheResult<()> {
        match self
            .state
            .compare_exchange(ACTIVE, DISPOSING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                debug!("cache disposing: draining operation queue");
                self.queue.shutdown().await;
                let flushed = if self.config.flush_on_dispose {
                    self.store.flush().await
                } else {
                    Ok(())
                };
                self.state.store(DISPOSED, Ordering::SeqCst);
                let _ = self.disposed_tx.send(true);
                debug!("cache disposed");
                flushed
            }
            Err(_) => {
                // Someone else won the exchange; resolve only once the
                // winner has drained the queue and flushed the store.
                let mut disposed = self.disposed_tx.subscribe();
                let _ = disposed.wait_for(|done| *done).await;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    async fn insert_scoped(
        &self,
        key: ScopedKey,
        value: Vec<u8>,
        expires_at: Option<Timestamp>,
    ) -> CacheResult<()> {
        let lane = key.lane().to_string();
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        self.queue
            .enqueue(&lane, move || async move {
                let encrypted = cipher.encrypt(value).await?;
                store.put(&key, &encrypted, expires_at).await
            })
            .await
    }

    async fn get_scoped(&self, key: ScopedKey) -> CacheResult<Vec<u8>> {
        let lane = key.lane().to_string();
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        self.queue
            .enqueue(&lane, move || async move {
                let encrypted = store.get(&key).await?;
                cipher.decrypt(encrypted).await
            })
            .await
    }

    async fn created_at_scoped(&self, key: ScopedKey) -> CacheResult<Option<Timestamp>> {
        let lane = key.lane().to_string();
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(&lane, move || async move { store.created_at(&key).await })
            .await
    }

    async fn invalidate_scoped(&self, key: ScopedKey) -> CacheResult<()> {
        let lane = key.lane().to_string();
        let store = Arc::clone(&self.store);
        self.queue
            .enqueue(&lane, move || async move { store.delete(&key).await })
            .await
    }
}

/// Rewrite a stored-key `KeyNotFound` to carry the user-facing key.
fn remap_not_found(err: CacheError, user_key: &str) -> CacheError {
    match err {
        CacheError::KeyNotFound { .. } => CacheError::not_found(user_key),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde::Deserialize;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        score: i64,
    }

    fn profile() -> Profile {
        Profile {
            name: "ada".to_string(),
            score: 99,
        }
    }

    #[tokio::test]
    async fn test_insert_get_round_trip() {
        let cache = BlobCache::in_memory();
        cache
            .insert("k", b"value".to_vec(), None)
            .await
            .expect("insert should succeed");
        assert_eq!(
            cache.get("k").await.expect("get should succeed"),
            b"value"
        );
    }

    #[tokio::test]
    async fn test_get_missing_key_not_found() {
        let cache = BlobCache::in_memory();
        assert!(matches!(
            cache.get("missing").await,
            Err(CacheError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_key_is_invalid() {
        let cache = BlobCache::in_memory();
        assert!(matches!(
            cache.insert("", b"v".to_vec(), None).await,
            Err(CacheError::InvalidKey { .. })
        ));
        assert!(matches!(
            cache.get("").await,
            Err(CacheError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_entry_invisible() {
        let cache = BlobCache::in_memory();
        cache
            .insert("k", b"v".to_vec(), Some(Utc::now() - Duration::seconds(1)))
            .await
            .expect("insert should succeed");
        assert!(matches!(
            cache.get("k").await,
            Err(CacheError::KeyNotFound { .. })
        ));
        assert_eq!(cache.created_at("k").await.expect("ok"), None);
    }

    #[tokio::test]
    async fn test_typed_and_raw_namespaces_are_separate() {
        let cache = BlobCache::in_memory();
        cache
            .insert("shared", b"raw".to_vec(), None)
            .await
            .expect("insert should succeed");
        cache
            .insert_object("shared", &profile(), None)
            .await
            .expect("insert_object should succeed");

        assert_eq!(cache.get("shared").await.expect("get"), b"raw");
        assert_eq!(
            cache
                .get_object::<Profile>("shared")
                .await
                .expect("get_object"),
            profile()
        );

        // Raw keys() does not leak typed entries.
        assert_eq!(cache.keys().await.expect("keys"), vec!["shared".to_string()]);
        assert_eq!(
            cache.object_keys::<Profile>().await.expect("object_keys"),
            vec!["shared".to_string()]
        );
    }

    #[tokio::test]
    async fn test_object_round_trip_and_invalidate() {
        let cache = BlobCache::in_memory();
        cache
            .insert_object("p", &profile(), None)
            .await
            .expect("insert_object should succeed");
        assert!(cache
            .object_created_at::<Profile>("p")
            .await
            .expect("ok")
            .is_some());

        cache
            .invalidate_object::<Profile>("p")
            .await
            .expect("invalidate should succeed");
        assert!(matches!(
            cache.get_object::<Profile>("p").await,
            Err(CacheError::KeyNotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_or_create_runs_factory_exactly_once() {
        let cache = BlobCache::in_memory();
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_create("expensive", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Give other callers time to pile up behind the lane.
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(b"computed".to_vec())
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle
                .await
                .expect("task should join")
                .expect("get_or_create should succeed");
            assert_eq!(value, b"computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "factory must run once");
    }

    #[tokio::test]
    async fn test_get_or_create_factory_failure_writes_nothing() {
        let cache = BlobCache::in_memory();
        let result = cache
            .get_or_create("k", || async {
                Err(CacheError::DeserializationFailed {
                    reason: "factory exploded".to_string(),
                })
            })
            .await;
        assert!(matches!(
            result,
            Err(CacheError::DeserializationFailed { .. })
        ));
        assert!(matches!(
            cache.get("k").await,
            Err(CacheError::KeyNotFound { .. })
        ));

        // The next attempt runs a fresh factory.
        let value = cache
            .get_or_create("k", || async { Ok(b"second try".to_vec()) })
            .await
            .expect("should succeed");
        assert_eq!(value, b"second try");
    }

    #[tokio::test]
    async fn test_bulk_round_trip() {
        let cache = BlobCache::in_memory();
        let entries: HashMap<String, Vec<u8>> = [
            ("a".to_string(), b"x".to_vec()),
            ("b".to_string(), b"y".to_vec()),
            ("c".to_string(), b"z".to_vec()),
        ]
        .into();
        cache
            .insert_many(entries.clone(), None)
            .await
            .expect("insert_many should succeed");

        let keys: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let found = cache.get_many(&keys).await.expect("get_many should succeed");
        assert_eq!(found, entries);

        let stamps = cache
            .created_at_many(&keys)
            .await
            .expect("created_at_many should succeed");
        assert_eq!(stamps.len(), 3);

        cache
            .invalidate_many(&keys)
            .await
            .expect("invalidate_many should succeed");
        assert!(cache.keys().await.expect("keys").is_empty());
    }

    #[tokio::test]
    async fn test_bulk_objects() {
        let cache = BlobCache::in_memory();
        let entries: HashMap<String, Profile> = [
            ("one".to_string(), profile()),
            (
                "two".to_string(),
                Profile {
                    name: "grace".to_string(),
                    score: 100,
                },
            ),
        ]
        .into();
        cache
            .insert_objects(entries.clone(), None)
            .await
            .expect("insert_objects should succeed");

        let found = cache
            .get_objects::<Profile>(&["one".to_string(), "two".to_string(), "three".to_string()])
            .await
            .expect("get_objects should succeed");
        assert_eq!(found, entries);
    }

    #[tokio::test]
    async fn test_invalidate_all_then_keys_empty() {
        let cache = BlobCache::in_memory();
        cache
            .insert("a", b"1".to_vec(), None)
            .await
            .expect("insert should succeed");
        cache
            .insert_object("b", &profile(), None)
            .await
            .expect("insert_object should succeed");

        cache
            .invalidate_all()
            .await
            .expect("invalidate_all should succeed");
        assert!(cache.keys().await.expect("keys").is_empty());
        assert!(cache
            .object_keys::<Profile>()
            .await
            .expect("object_keys")
            .is_empty());
    }

    #[tokio::test]
    async fn test_disposed_cache_rejects_everything() {
        let cache = BlobCache::in_memory();
        cache
            .insert("k", b"v".to_vec(), None)
            .await
            .expect("insert should succeed");
        cache.dispose().await.expect("dispose should succeed");

        assert!(matches!(
            cache.insert("k", b"v".to_vec(), None).await,
            Err(CacheError::Disposed)
        ));
        assert!(matches!(cache.get("k").await, Err(CacheError::Disposed)));
        assert!(matches!(
            cache.invalidate("k").await,
            Err(CacheError::Disposed)
        ));
        assert!(matches!(cache.keys().await, Err(CacheError::Disposed)));
        assert!(matches!(cache.flush().await, Err(CacheError::Disposed)));

        // Dispose again is fine.
        cache.dispose().await.expect("dispose is idempotent");
    }

    /// Memory store whose flush takes a while and records its completion,
    /// for observing disposal ordering.
    struct SlowFlushStore {
        inner: MemoryStore,
        flushed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl BlobStore for SlowFlushStore {
        async fn put(
            &self,
            key: &ScopedKey,
            value: &[u8],
            expires_at: Option<Timestamp>,
        ) -> CacheResult<()> {
            self.inner.put(key, value, expires_at).await
        }

        async fn get(&self, key: &ScopedKey) -> CacheResult<Vec<u8>> {
            self.inner.get(key).await
        }

        async fn created_at(&self, key: &ScopedKey) -> CacheResult<Option<Timestamp>> {
            self.inner.created_at(key).await
        }

        async fn delete(&self, key: &ScopedKey) -> CacheResult<()> {
            self.inner.delete(key).await
        }

        async fn delete_all(&self) -> CacheResult<()> {
            self.inner.delete_all().await
        }

        async fn keys(&self) -> CacheResult<Vec<String>> {
            self.inner.keys().await
        }

        async fn put_many(
            &self,
            entries: Vec<(ScopedKey, Vec<u8>)>,
            expires_at: Option<Timestamp>,
        ) -> CacheResult<()> {
            self.inner.put_many(entries, expires_at).await
        }

        async fn get_many(&self, keys: &[ScopedKey]) -> CacheResult<HashMap<String, Vec<u8>>> {
            self.inner.get_many(keys).await
        }

        async fn created_at_many(
            &self,
            keys: &[ScopedKey],
        ) -> CacheResult<HashMap<String, Timestamp>> {
            self.inner.created_at_many(keys).await
        }

        async fn delete_many(&self, keys: &[ScopedKey]) -> CacheResult<()> {
            self.inner.delete_many(keys).await
        }

        async fn compact(&self) -> CacheResult<()> {
            self.inner.compact().await
        }

        async fn flush(&self) -> CacheResult<()> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.flushed.store(true, Ordering::SeqCst);
            self.inner.flush().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispose_waits_for_flush() {
        let flushed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cache = BlobCache::new(
            SlowFlushStore {
                inner: MemoryStore::new(),
                flushed: Arc::clone(&flushed),
            },
            NullCipher,
            CacheConfig::default(),
        );

        // Both callers race; whichever loses the exchange must still not
        // resolve before the winner's flush has completed.
        let mut observers = Vec::new();
        for _ in 0..2 {
            let cache = cache.clone();
            let flushed = Arc::clone(&flushed);
            observers.push(tokio::spawn(async move {
                cache.dispose().await.expect("dispose should succeed");
                flushed.load(Ordering::SeqCst)
            }));
        }
        for observer in observers {
            assert!(
                observer.await.expect("task should join"),
                "dispose resolved before the store flush completed"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_key_fifo_through_facade() {
        let cache = BlobCache::in_memory();

        // Submit two writes to the same key from concurrent callers; the
        // second submitted must win.
        let c1 = cache.clone();
        let first = c1.insert("k", b"first".to_vec(), None);
        let c2 = cache.clone();
        let second = c2.insert("k", b"second".to_vec(), None);

        let (r1, r2) = tokio::join!(first, second);
        r1.expect("first insert should succeed");
        r2.expect("second insert should succeed");
        assert_eq!(cache.get("k").await.expect("get"), b"second");
    }
}
