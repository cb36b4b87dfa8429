//! End-to-end tests of the cache façade over the SQLite backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cask::{
    BlobCache, BlobStore, CacheConfig, CacheError, NullCipher, ScopedKey, SqliteStore, XorCipher,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: u64,
    email: String,
}

fn account() -> Account {
    Account {
        id: 7,
        email: "ada@example.com".to_string(),
    }
}

#[tokio::test]
async fn round_trips_bytes_through_sqlite() {
    let dir = TempDir::new().expect("tempdir");
    let cache = BlobCache::open(dir.path().join("cache.db"), CacheConfig::default())
        .await
        .expect("open should succeed");

    cache
        .insert("blob", vec![0, 1, 2, 254, 255], None)
        .await
        .expect("insert should succeed");
    assert_eq!(
        cache.get("blob").await.expect("get should succeed"),
        vec![0, 1, 2, 254, 255]
    );
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test]
async fn values_survive_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("cache.db");

    {
        let cache = BlobCache::open(&path, CacheConfig::default())
            .await
            .expect("open should succeed");
        cache
            .insert_object("me", &account(), None)
            .await
            .expect("insert_object should succeed");
        cache.dispose().await.expect("dispose should succeed");
    }

    let cache = BlobCache::open(&path, CacheConfig::default())
        .await
        .expect("reopen should succeed");
    assert_eq!(
        cache
            .get_object::<Account>("me")
            .await
            .expect("get_object should succeed"),
        account()
    );
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test]
async fn encrypted_values_are_not_plaintext_on_disk() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("secure.db");
    let store = SqliteStore::open(&path).expect("store open");
    let cache = BlobCache::new(store, XorCipher::new(b"vault key"), CacheConfig::default());

    cache
        .insert("secret", b"plaintext payload".to_vec(), None)
        .await
        .expect("insert should succeed");
    assert_eq!(
        cache.get("secret").await.expect("get should succeed"),
        b"plaintext payload"
    );
    cache.dispose().await.expect("dispose should succeed");

    // Inspect the raw stored bytes with a second, cipher-free handle.
    let raw_store = SqliteStore::open(&path).expect("reopen store");
    let stored = raw_store
        .get(&ScopedKey::raw("secret").expect("valid key"))
        .await
        .expect("raw get should succeed");
    assert_ne!(stored, b"plaintext payload");
    assert!(!stored
        .windows(b"plaintext".len())
        .any(|w| w == b"plaintext"));
}

#[tokio::test]
async fn wrong_key_material_is_a_decryption_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("secure.db");

    {
        let store = SqliteStore::open(&path).expect("store open");
        let cache = BlobCache::new(store, XorCipher::new(b"right"), CacheConfig::default());
        cache
            .insert("k", b"v".to_vec(), None)
            .await
            .expect("insert should succeed");
        cache.dispose().await.expect("dispose should succeed");
    }

    let store = SqliteStore::open(&path).expect("store open");
    let cache = BlobCache::new(store, XorCipher::new(b"wrong"), CacheConfig::default());
    let err = cache.get("k").await.expect_err("should fail to decrypt");
    assert!(matches!(err, CacheError::DecryptionFailed { .. }));
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test]
async fn expired_entries_vanish_and_vacuum_reclaims_them() {
    let dir = TempDir::new().expect("tempdir");
    let cache = BlobCache::open(dir.path().join("cache.db"), CacheConfig::default())
        .await
        .expect("open should succeed");

    cache
        .insert("stale", b"old".to_vec(), Some(Utc::now() - Duration::seconds(2)))
        .await
        .expect("insert should succeed");
    cache
        .insert("fresh", b"new".to_vec(), Some(Utc::now() + Duration::hours(1)))
        .await
        .expect("insert should succeed");

    assert!(matches!(
        cache.get("stale").await,
        Err(CacheError::KeyNotFound { .. })
    ));
    cache.vacuum().await.expect("vacuum should succeed");
    assert_eq!(cache.keys().await.expect("keys"), vec!["fresh".to_string()]);
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test]
async fn legacy_bare_rows_decode_through_the_facade() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("cache.db");

    // Simulate a row written by an old version: bare JSON, no envelope,
    // planted directly in the store under the typed key.
    {
        let store = SqliteStore::open(&path).expect("store open");
        let key = ScopedKey::typed::<Account>("legacy").expect("valid key");
        let bare = serde_json::to_vec(&account()).expect("encode");
        store.put(&key, &bare, None).await.expect("put should succeed");
    }

    let cache = BlobCache::open(&path, CacheConfig::default())
        .await
        .expect("open should succeed");
    assert_eq!(
        cache
            .get_object::<Account>("legacy")
            .await
            .expect("legacy row should decode"),
        account()
    );
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_or_create_coalesces_on_sqlite() {
    let dir = TempDir::new().expect("tempdir");
    let cache = BlobCache::open(dir.path().join("cache.db"), CacheConfig::default())
        .await
        .expect("open should succeed");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_create("token", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                    Ok(b"issued-token".to_vec())
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(
            handle.await.expect("join").expect("get_or_create"),
            b"issued-token"
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test]
async fn bulk_operations_round_trip_on_sqlite() {
    let dir = TempDir::new().expect("tempdir");
    let cache = BlobCache::open(dir.path().join("cache.db"), CacheConfig::default())
        .await
        .expect("open should succeed");

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

    let found = cache
        .get_many(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .expect("get_many should succeed");
    assert_eq!(found, entries);
    cache.dispose().await.expect("dispose should succeed");
}

#[tokio::test]
async fn dispose_flushes_then_rejects() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("cache.db");
    let cache = BlobCache::open(&path, CacheConfig::default())
        .await
        .expect("open should succeed");

    cache
        .insert("k", b"v".to_vec(), None)
        .await
        .expect("insert should succeed");
    cache.dispose().await.expect("dispose should succeed");
    assert!(matches!(
        cache.get("k").await,
        Err(CacheError::Disposed)
    ));
    cache.dispose().await.expect("dispose is idempotent");

    // Flushed data is durable for the next handle.
    let store = SqliteStore::open(&path).expect("reopen");
    let cache = BlobCache::new(store, NullCipher, CacheConfig::default());
    assert_eq!(cache.get("k").await.expect("get"), b"v");
    cache.dispose().await.expect("dispose should succeed");
}
