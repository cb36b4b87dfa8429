//! Configuration types.
//!
//! All configuration is passed explicitly: there is no ambient settings
//! lookup anywhere in the engine.

use serde::{Deserialize, Serialize};

/// Configuration for a blob cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Flush the store before releasing handles during disposal.
    pub flush_on_dispose: bool,
    /// Purge expired rows when the store is opened.
    pub purge_expired_on_open: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_on_dispose: true,
            purge_expired_on_open: false,
        }
    }
}

impl CacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether disposal flushes the store first.
    pub fn with_flush_on_dispose(mut self, flush: bool) -> Self {
        self.flush_on_dispose = flush;
        self
    }

    /// Set whether opening the store purges already-expired rows.
    pub fn with_purge_expired_on_open(mut self, purge: bool) -> Self {
        self.purge_expired_on_open = purge;
        self
    }
}

/// Configuration for the serialization layer.
///
/// Replaces the original design's service-located serializer settings with
/// an explicit value threaded into the serializer's constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Record the type tag in the canonical envelope on write.
    pub write_type_tags: bool,
    /// Reject an envelope whose type tag does not match the requested type.
    /// Off by default: renamed types keep decoding their old data.
    pub enforce_type_tags: bool,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            write_type_tags: true,
            enforce_type_tags: false,
        }
    }
}

impl SerializerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether envelopes record a type tag.
    pub fn with_write_type_tags(mut self, write: bool) -> Self {
        self.write_type_tags = write;
        self
    }

    /// Set whether type tags are enforced on decode.
    pub fn with_enforce_type_tags(mut self, enforce: bool) -> Self {
        self.enforce_type_tags = enforce;
        self
    }
}
