//! cask - Embedded asynchronous persistent blob cache.
//!
//! cask stores byte blobs (and typed objects serialized on top of them)
//! under string keys, with optional expiration, optional encryption at
//! rest, and safe concurrent access: operations sharing a key run FIFO,
//! operations on distinct keys run in parallel.
//!
//! # Architecture
//!
//! ```text
//! caller -> BlobCache -> KeyedQueue (per-key lanes)
//!                          -> Cipher -> BlobStore (SQLite or memory)
//! ```
//!
//! Reads reverse the cipher step and enforce expiration before returning.
//!
//! # Quick start
//!
//! ```ignore
//! use cask::{BlobCache, CacheConfig};
//!
//! let cache = BlobCache::open("app-cache.db", CacheConfig::default()).await?;
//! cache.insert("avatar:42", png_bytes, None).await?;
//! let bytes = cache
//!     .get_or_create("avatar:43", || async { fetch_avatar(43).await })
//!     .await?;
//! cache.dispose().await?;
//! ```

pub mod cache;
pub mod crypto;
pub mod queue;
pub mod registry;
pub mod serializer;
pub mod store;

pub use cache::BlobCache;
pub use crypto::{Cipher, NullCipher, XorCipher};
pub use queue::KeyedQueue;
pub use registry::{CacheRegistry, DynCache};
pub use serializer::Serializer;
pub use store::{BlobStore, MemoryStore, SqliteStore};

// Re-export the core types callers need at the API surface.
pub use cask_core::{
    CacheConfig, CacheEntry, CacheError, CacheResult, ScopedKey, SerializerConfig, StorageError,
    Timestamp,
};
