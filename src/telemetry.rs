//! Robot-side telemetry helpers.
//!
//! The committing robot keeps its own entry log ([`TelemetryLog`]); only the
//! Merkle root and a signature over it are submitted to the task engine.
//! Later inclusion proofs are generated from the retained log.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::digest::Hash;
use crate::error::CoreError;
use crate::merkle::{MerkleEngine, MerkleTree, Proof};

/// Ordered, append-only telemetry log.
#[derive(Debug, Clone)]
pub struct TelemetryLog<T> {
    engine: MerkleEngine,
    entries: Vec<T>,
}

impl<T: Serialize> TelemetryLog<T> {
    pub fn new(engine: MerkleEngine) -> Self {
        Self {
            engine,
            entries: Vec::new(),
        }
    }

    pub fn from_entries(engine: MerkleEngine, entries: Vec<T>) -> Self {
        Self { engine, entries }
    }

    /// Append an entry, returning its leaf index.
    pub fn append(&mut self, entry: T) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tree(&self) -> Result<MerkleTree, CoreError> {
        self.engine.build_tree(&self.entries)
    }

    pub fn root(&self) -> Result<Option<Hash>, CoreError> {
        self.engine.root(&self.entries)
    }

    pub fn proof(&self, index: usize) -> Result<Proof, CoreError> {
        self.engine.proof(&self.entries, index)
    }
}

/// External signing collaborator. Signatures are opaque to the core.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_root(&self, root: &Hash) -> Result<String, CoreError>;
}

/// Fallback signer producing `signed:<root>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSigner;

#[async_trait]
impl Signer for MockSigner {
    async fn sign_root(&self, root: &Hash) -> Result<String, CoreError> {
        Ok(format!("signed:{}", root))
    }
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the root's textual encoding, hex encoded.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, CoreError> {
        let key = key.into();
        if key.is_empty() {
            return Err(CoreError::InvalidArgument(
                "signing key cannot be empty".to_string(),
            ));
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Result<HmacSha256, CoreError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid signing key: {}", e)))
    }

    /// Check a signature produced by this key.
    pub fn verify(&self, root: &Hash, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(root.as_str().as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for HmacSigner {
    async fn sign_root(&self, root: &Hash) -> Result<String, CoreError> {
        let mut mac = self.mac()?;
        mac.update(root.as_str().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
