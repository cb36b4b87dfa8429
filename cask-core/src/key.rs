//! Scoped cache key system separating raw-blob and typed-object namespaces.
//!
//! The key insight is that `ScopedKey`'s private constructor makes namespace
//! mixups uncompilable: every stored key is built through [`ScopedKey::raw`]
//! or [`ScopedKey::typed`], so a raw blob and a typed object stored under the
//! same user key can never collide on disk.

use crate::error::{CacheError, CacheResult};

/// Queue lane shared by operations that do not target a single key
/// (invalidate-all, key enumeration, flush, vacuum, bulk batches).
pub const DEFAULT_LANE: &str = "\u{1f}default";

/// Separator between the type tag and the user key in a typed stored key.
///
/// The ASCII unit separator never appears in reasonable user keys, and is
/// rejected by validation so the encoding stays unambiguous.
const SEPARATOR: char = '\u{1f}';

/// Stable tag identifying the type namespace of a typed entry.
pub fn type_tag<T>() -> &'static str {
    std::any::type_name::<T>()
}

/// A validated stored key, scoped to either the raw-blob namespace or a
/// single type's namespace.
///
/// # Stored format
///
/// - Raw: the user key verbatim.
/// - Typed: `<type tag> 0x1F <user key>`.
///
/// Raw keys cannot contain the separator, so the two forms never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    inner: KeyInner,
}

/// Private inner data - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    stored: String,
    user_len: usize,
}

impl ScopedKey {
    /// Create a key in the raw-blob namespace.
    ///
    /// Fails with [`CacheError::InvalidKey`] if `key` is empty or contains
    /// the reserved separator byte.
    pub fn raw(key: &str) -> CacheResult<Self> {
        validate(key)?;
        Ok(Self {
            inner: KeyInner {
                stored: key.to_string(),
                user_len: key.len(),
            },
        })
    }

    /// Create a key in the namespace of type `T`.
    pub fn typed<T>(key: &str) -> CacheResult<Self> {
        validate(key)?;
        Ok(Self {
            inner: KeyInner {
                stored: format!("{}{}{}", type_tag::<T>(), SEPARATOR, key),
                user_len: key.len(),
            },
        })
    }

    /// The exact string handed to the blob store.
    pub fn as_stored(&self) -> &str {
        &self.inner.stored
    }

    /// The queue lane serializing operations on this key.
    ///
    /// Lanes are per stored key, so raw and typed operations on the same
    /// user key run concurrently while same-namespace operations are FIFO.
    pub fn lane(&self) -> &str {
        &self.inner.stored
    }

    /// The caller-supplied portion of the key.
    pub fn user_key(&self) -> &str {
        &self.inner.stored[self.inner.stored.len() - self.inner.user_len..]
    }

    /// Split a stored key back into `(type_tag, user_key)`.
    ///
    /// Raw-namespace keys yield `(None, key)`.
    pub fn split_stored(stored: &str) -> (Option<&str>, &str) {
        match stored.split_once(SEPARATOR) {
            Some((tag, user)) => (Some(tag), user),
            None => (None, stored),
        }
    }
}

fn validate(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::invalid_key("key must not be empty"));
    }
    if key.contains(SEPARATOR) {
        return Err(CacheError::invalid_key(
            "key must not contain the reserved separator \\u{1f}",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_stores_verbatim() {
        let key = ScopedKey::raw("user:42").expect("valid key");
        assert_eq!(key.as_stored(), "user:42");
        assert_eq!(key.user_key(), "user:42");
        assert_eq!(key.lane(), "user:42");
    }

    #[test]
    fn test_typed_key_is_namespaced() {
        let raw = ScopedKey::raw("user:42").expect("valid key");
        let typed = ScopedKey::typed::<String>("user:42").expect("valid key");
        assert_ne!(raw.as_stored(), typed.as_stored());
        assert_eq!(typed.user_key(), "user:42");
        assert!(typed.as_stored().starts_with(type_tag::<String>()));
    }

    #[test]
    fn test_distinct_types_get_distinct_namespaces() {
        let a = ScopedKey::typed::<String>("k").expect("valid key");
        let b = ScopedKey::typed::<u64>("k").expect("valid key");
        assert_ne!(a.as_stored(), b.as_stored());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            ScopedKey::raw(""),
            Err(CacheError::InvalidKey { .. })
        ));
        assert!(matches!(
            ScopedKey::typed::<String>(""),
            Err(CacheError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_separator_in_key_rejected() {
        assert!(matches!(
            ScopedKey::raw("a\u{1f}b"),
            Err(CacheError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_split_stored_round_trips() {
        let typed = ScopedKey::typed::<u64>("answer").expect("valid key");
        let (tag, user) = ScopedKey::split_stored(typed.as_stored());
        assert_eq!(tag, Some(type_tag::<u64>()));
        assert_eq!(user, "answer");

        let raw = ScopedKey::raw("answer").expect("valid key");
        let (tag, user) = ScopedKey::split_stored(raw.as_stored());
        assert_eq!(tag, None);
        assert_eq!(user, "answer");
    }

    #[test]
    fn test_default_lane_is_not_a_valid_user_key() {
        // The sentinel contains the separator, so callers can never collide
        // with it through the public constructors.
        assert!(ScopedKey::raw(DEFAULT_LANE).is_err());
    }
}
