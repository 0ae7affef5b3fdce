//! Error types surfaced by every core operation.
//!
//! All errors are returned synchronously to the caller of the failing
//! operation. Subscriber failures during event delivery never appear here;
//! see [`crate::events::EventBus`].

use crate::store::StoreError;
use crate::task::TaskId;

/// Errors that can occur during lifecycle, registry and Merkle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Robot not registered: {0}")]
    NotRegistered(String),

    #[error("Telemetry not submitted for task {0}")]
    TelemetryMissing(TaskId),

    #[error("Task {0} not verified")]
    NotVerified(TaskId),

    #[error("Leaf index {index} out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Cannot canonicalize digest input: {0}")]
    Serialization(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    pub fn task_not_found(id: TaskId) -> Self {
        Self::NotFound(format!("task {}", id))
    }

    pub fn robot_not_found(wallet: &str) -> Self {
        Self::NotFound(format!("robot {}", wallet))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
