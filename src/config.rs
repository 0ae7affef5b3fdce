//! Configuration management for RoboTaskNet.
//!
//! Configuration can be set via environment variables:
//! - `ROBOTASKNET_STORE` - Optional. `memory`, `file` or `sqlite`. Defaults to `memory`.
//! - `ROBOTASKNET_DATA_DIR` - Optional. Directory for durable stores. Defaults to `./.robotasknet`.
//! - `ROBOTASKNET_NATIVE_TOKEN` - Optional. Ticker used when a task names no token. Defaults to `$RTN`.
//! - `ROBOTASKNET_CLAIM_POLICY` - Optional. `strict` or `permissive`. Defaults to `strict`.
//! - `ROBOTASKNET_DIGEST` - Optional. `djb2` or `sha256`. Defaults to `djb2`.
//! - `ROBOTASKNET_SIGNING_KEY` - Optional. Enables HMAC signing of telemetry roots.
//! - `ROBOTASKNET_EVENT_CAPACITY` - Optional. Broadcast buffer size. Defaults to `1024`.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::digest::{DigestRef, Djb2Digest, Sha256Digest};
use crate::store::RecordStoreType;

/// Native token ticker.
pub const NATIVE_TOKEN: &str = "$RTN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// How strictly lifecycle preconditions are enforced.
///
/// # Strict
/// `claim` requires `POSTED`, `submit_telemetry` requires `CLAIMED`,
/// `verify` requires `SUBMITTED`. Every optional task field is then
/// written exactly once.
///
/// # Permissive
/// Only existence, registration and telemetry-presence checks apply, so a
/// task can be re-claimed or re-submitted at any point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimPolicy {
    #[default]
    Strict,
    Permissive,
}

impl ClaimPolicy {
    pub fn is_strict(self) -> bool {
        matches!(self, ClaimPolicy::Strict)
    }
}

/// Which digest function backs the Merkle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestKind {
    #[default]
    Djb2,
    Sha256,
}

impl DigestKind {
    pub fn build(self) -> DigestRef {
        match self {
            DigestKind::Djb2 => Arc::new(Djb2Digest),
            DigestKind::Sha256 => Arc::new(Sha256Digest),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_type: RecordStoreType,

    /// Directory for file and sqlite stores
    pub data_dir: PathBuf,

    /// Ticker assigned to tasks posted without one
    pub native_token: String,

    pub claim_policy: ClaimPolicy,

    pub digest: DigestKind,

    /// Secret for HMAC telemetry signatures; mock signatures when unset
    pub signing_key: Option<String>,

    /// Capacity of the lifecycle event broadcast channel
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_type: RecordStoreType::Memory,
            data_dir: PathBuf::from(".robotasknet"),
            native_token: NATIVE_TOKEN.to_string(),
            claim_policy: ClaimPolicy::Strict,
            digest: DigestKind::Djb2,
            signing_key: None,
            event_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unrecognised policy, digest or
    /// capacity values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let store_type = lookup("ROBOTASKNET_STORE")
            .map(|v| RecordStoreType::from_str(&v))
            .unwrap_or(defaults.store_type);

        let data_dir = lookup("ROBOTASKNET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let native_token = lookup("ROBOTASKNET_NATIVE_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.native_token);

        let claim_policy = match lookup("ROBOTASKNET_CLAIM_POLICY") {
            None => defaults.claim_policy,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "strict" => ClaimPolicy::Strict,
                "permissive" | "reference" => ClaimPolicy::Permissive,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "ROBOTASKNET_CLAIM_POLICY".to_string(),
                        other.to_string(),
                    ))
                }
            },
        };

        let digest = match lookup("ROBOTASKNET_DIGEST") {
            None => defaults.digest,
            Some(v) => match v.trim().to_lowercase().as_str() {
                "djb2" => DigestKind::Djb2,
                "sha256" | "sha-256" => DigestKind::Sha256,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "ROBOTASKNET_DIGEST".to_string(),
                        other.to_string(),
                    ))
                }
            },
        };

        let signing_key = lookup("ROBOTASKNET_SIGNING_KEY").filter(|v| !v.is_empty());

        let event_capacity = match lookup("ROBOTASKNET_EVENT_CAPACITY") {
            None => defaults.event_capacity,
            Some(v) => v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue("ROBOTASKNET_EVENT_CAPACITY".to_string(), v.clone())
                })?,
        };

        Ok(Self {
            store_type,
            data_dir,
            native_token,
            claim_policy,
            digest,
            signing_key,
            event_capacity,
        })
    }
}
