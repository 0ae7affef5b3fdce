//! Task module - task records, lifecycle transitions and the engine that
//! persists them.
//!
//! Transitions on [`Task`] are pure and validated; [`TaskEngine`] adds
//! storage, registry checks and event publication around them.

mod commitment;
mod engine;
pub mod task;

pub use commitment::{TelemetryCommitment, VerificationOutcome};
pub use engine::{TaskEngine, TaskFilter};
pub use task::{PostTask, Task, TaskId, TaskStatus};
