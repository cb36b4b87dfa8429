//! The durable cache entry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The durable unit stored by a blob store: one opaque value under one key.
///
/// `created_at` is assigned by the store at write time and immutable once
/// written. An entry whose `expires_at` is in the past is logically absent
/// even if not yet physically removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Stored key, unique per cache instance.
    pub key: String,
    /// Opaque byte payload (post-encryption if a cipher is configured).
    pub value: Vec<u8>,
    /// Write timestamp, UTC, millisecond precision on disk.
    pub created_at: DateTime<Utc>,
    /// Absent means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether this entry is logically absent at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }
}
