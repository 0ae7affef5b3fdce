//! Telemetry commitments and oracle verification outcomes attached to tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::Hash;

/// A robot's commitment to its execution log.
///
/// The signature comes from an external signer and is never checked here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryCommitment {
    pub root: Hash,
    pub signature: String,
    #[serde(rename = "metadataURI")]
    pub metadata_uri: String,
    pub submitted_at: DateTime<Utc>,
}

/// Result recorded by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub ok: bool,
    /// Opaque proof payload supplied by the oracle
    #[serde(default)]
    pub proof: Value,
    pub verified_at: DateTime<Utc>,
}
