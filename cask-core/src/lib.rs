//! cask-core - Data Types
//!
//! Pure data structures with no behavior beyond validation. The engine crate
//! (`cask`) depends on this; this crate contains no I/O and no async code.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;

pub use config::{CacheConfig, SerializerConfig};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult, StorageError};
pub use key::{type_tag, ScopedKey, DEFAULT_LANE};

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
