//! Encryption pipeline.
//!
//! Bytes pass through a [`Cipher`] immediately before they reach the blob
//! store and immediately after they are read back. The façade is oblivious
//! to what the transform does; the only contract is
//! `decrypt(encrypt(x)) == x` and that a failed decrypt surfaces as
//! `DecryptionFailed`, never as `KeyNotFound`.

use async_trait::async_trait;
use cask_core::{CacheError, CacheResult};
use sha2::{Digest, Sha256};

/// Byte transform applied around the blob store.
///
/// Implementations may be asynchronous (e.g. delegating to an OS keychain)
/// and are not required to produce deterministic ciphertext across calls.
#[async_trait]
pub trait Cipher: Send + Sync {
    /// Transform bytes on their way into the store.
    async fn encrypt(&self, bytes: Vec<u8>) -> CacheResult<Vec<u8>>;

    /// Reverse [`Cipher::encrypt`].
    ///
    /// Fails with `DecryptionFailed` on wrong key material or corrupted
    /// input.
    async fn decrypt(&self, bytes: Vec<u8>) -> CacheResult<Vec<u8>>;
}

/// The identity transform. Default when no encryption is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCipher;

#[async_trait]
impl Cipher for NullCipher {
    async fn encrypt(&self, bytes: Vec<u8>) -> CacheResult<Vec<u8>> {
        Ok(bytes)
    }

    async fn decrypt(&self, bytes: Vec<u8>) -> CacheResult<Vec<u8>> {
        Ok(bytes)
    }
}

/// Length of the integrity tag prepended to [`XorCipher`] output.
const TAG_LEN: usize = 8;

/// Keyed XOR keystream with an integrity tag.
///
/// This is obfuscation-at-rest, NOT real cryptography: it keeps casual
/// readers out of the database file and detects wrong-key or corrupted
/// reads, nothing more. Swap in a real AEAD cipher behind the same trait
/// for anything security-sensitive.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key_hash: [u8; 32],
}

impl XorCipher {
    /// Derive the keystream seed from arbitrary key material.
    pub fn new(key_material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key_material);
        Self {
            key_hash: hasher.finalize().into(),
        }
    }

    fn keystream_block(&self, counter: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key_hash);
        hasher.update(counter.to_le_bytes());
        hasher.finalize().into()
    }

    fn apply_keystream(&self, bytes: &mut [u8]) {
        for (i, chunk) in bytes.chunks_mut(32).enumerate() {
            let block = self.keystream_block(i as u64);
            for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= pad;
            }
        }
    }

    fn tag(&self, plaintext: &[u8]) -> [u8; TAG_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(b"cask-xor-tag");
        hasher.update(self.key_hash);
        hasher.update(plaintext);
        let digest = hasher.finalize();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&digest[..TAG_LEN]);
        tag
    }
}

#[async_trait]
impl Cipher for XorCipher {
    async fn encrypt(&self, bytes: Vec<u8>) -> CacheResult<Vec<u8>> {
        let tag = self.tag(&bytes);
        let mut out = Vec::with_capacity(TAG_LEN + bytes.len());
        out.extend_from_slice(&tag);
        out.extend_from_slice(&bytes);
        self.apply_keystream(&mut out[TAG_LEN..]);
        Ok(out)
    }

    async fn decrypt(&self, bytes: Vec<u8>) -> CacheResult<Vec<u8>> {
        if bytes.len() < TAG_LEN {
            return Err(CacheError::DecryptionFailed {
                reason: "ciphertext shorter than integrity tag".to_string(),
            });
        }
        let (tag, body) = bytes.split_at(TAG_LEN);
        let mut plaintext = body.to_vec();
        self.apply_keystream(&mut plaintext);
        if self.tag(&plaintext) != tag {
            return Err(CacheError::DecryptionFailed {
                reason: "integrity tag mismatch".to_string(),
            });
        }
        Ok(plaintext)
    }
}
