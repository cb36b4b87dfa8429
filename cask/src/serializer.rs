//! Typed-object serialization with backward-compatible decoding.
//!
//! The canonical on-disk shape wraps the value in a small JSON envelope
//! (`{"tag": ..., "value": ...}`) so that `null` round-trips and the
//! writing type is recorded. Older versions of the cache wrote the bare
//! encoded value with no envelope; that shape must stay readable forever.
//!
//! Decode is therefore a fixed two-attempt strategy: canonical envelope
//! first, legacy bare value second. This is the documented migration path
//! between formats, not an optimization, and it is pinned by tests.

use cask_core::{type_tag, CacheError, CacheResult, SerializerConfig};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Canonical encoding envelope (decode side).
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope<T> {
    #[serde(default)]
    tag: Option<String>,
    value: T,
}

/// Canonical encoding envelope (encode side, borrows the value).
#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    tag: Option<&'static str>,
    value: &'a T,
}

/// Converts typed values to and from raw byte blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer {
    config: SerializerConfig,
}

impl Serializer {
    /// Create a serializer with explicit configuration.
    pub fn new(config: SerializerConfig) -> Self {
        Self { config }
    }

    /// Encode a value in the canonical envelope shape.
    pub fn to_bytes<T: Serialize>(&self, value: &T) -> CacheResult<Vec<u8>> {
        let envelope = EnvelopeRef {
            tag: self.config.write_type_tags.then(|| type_tag::<T>()),
            value,
        };
        serde_json::to_vec(&envelope).map_err(|e| CacheError::DeserializationFailed {
            reason: format!("serialization failed: {e}"),
        })
    }

    /// Decode bytes written by either encoding shape.
    ///
    /// Attempts the canonical envelope first, then the legacy bare value.
    /// Fails with `DeserializationFailed` when neither shape matches `T`.
    pub fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        match serde_json::from_slice::<Envelope<T>>(bytes) {
            Ok(envelope) => {
                if self.config.enforce_type_tags {
                    if let Some(tag) = &envelope.tag {
                        if tag != type_tag::<T>() {
                            return self.decode_bare(bytes, &format!(
                                "envelope tag {tag:?} does not match requested type {:?}",
                                type_tag::<T>()
                            ));
                        }
                    }
                }
                Ok(envelope.value)
            }
            Err(envelope_err) => self.decode_bare(bytes, &envelope_err.to_string()),
        }
    }

    /// Legacy-shape fallback: the bare encoded value, no envelope.
    fn decode_bare<T: DeserializeOwned>(
        &self,
        bytes: &[u8],
        envelope_failure: &str,
    ) -> CacheResult<T> {
        serde_json::from_slice::<T>(bytes).map_err(|bare_err| {
            CacheError::DeserializationFailed {
                reason: format!(
                    "neither shape matched: envelope ({envelope_failure}); bare ({bare_err})"
                ),
            }
        })
    }
}
