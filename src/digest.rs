//! Pluggable digest function underlying the Merkle engine.
//!
//! Callers only ever see [`Hash`] values and the [`Digest`] trait, so the
//! reference `djb2` hash can be swapped for SHA-256 without touching the
//! tree logic.
//!
//! # Canonicalisation
//! Strings are hashed as-is. Any other serialisable value is first rendered
//! to compact JSON (object keys sorted), then hashed as text.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::error::CoreError;

/// Fixed-width digest rendered as `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(String);

impl Hash {
    /// Wrap an already-encoded digest (e.g. a root received from a robot).
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strategy interface for the digest function.
///
/// Implementations must be pure: the same input always yields the same
/// output width and value.
pub trait Digest: Send + Sync + fmt::Debug {
    /// Short identifier used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Digest an already-canonical textual input.
    fn digest_str(&self, input: &str) -> Hash;
}

/// Shared handle to a digest strategy.
pub type DigestRef = Arc<dyn Digest>;

/// Render a value into the text that gets hashed.
///
/// # Errors
/// `CoreError::Serialization` if the value cannot be represented as JSON.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<String, CoreError> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Ok(serde_json::to_string(&other)?),
    }
}

/// `digest(value)` over any serialisable value.
pub fn digest_value<T: Serialize + ?Sized>(
    digest: &dyn Digest,
    value: &T,
) -> Result<Hash, CoreError> {
    let canonical = canonicalize(value)?;
    Ok(digest.digest_str(&canonical))
}

/// Fast non-cryptographic 32-bit `djb2` over UTF-16 code units.
///
/// Reference behaviour only; collisions are easy to construct.
#[derive(Debug, Clone, Copy, Default)]
pub struct Djb2Digest;

impl Djb2Digest {
    fn raw(input: &str) -> u32 {
        input
            .encode_utf16()
            .fold(5381u32, |hash, unit| {
                hash.wrapping_mul(33).wrapping_add(u32::from(unit))
            })
    }
}

impl Digest for Djb2Digest {
    fn name(&self) -> &'static str {
        "djb2"
    }

    fn digest_str(&self, input: &str) -> Hash {
        Hash(format!("0x{:08x}", Self::raw(input)))
    }
}

/// SHA-256 over the UTF-8 bytes of the canonical input.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl Digest for Sha256Digest {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn digest_str(&self, input: &str) -> Hash {
        use sha2::Digest as _;
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        Hash(format!("0x{}", hex::encode(hasher.finalize())))
    }
}
