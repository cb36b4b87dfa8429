//! Error types for cask operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Store corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Master error type for all cask operations.
///
/// Callers must be able to tell "not present" from "present but
/// undecodable" from "cache unusable", so these are distinct variants
/// rather than one generic failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Cache has been disposed")]
    Disposed,

    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CacheError {
    /// Construct a `KeyNotFound` for a stored key.
    pub fn not_found(key: impl Into<String>) -> Self {
        CacheError::KeyNotFound { key: key.into() }
    }

    /// Construct an `InvalidKey` with a reason.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        CacheError::InvalidKey {
            reason: reason.into(),
        }
    }
}

/// Result type alias for cask operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
