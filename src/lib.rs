//! # RoboTaskNet
//!
//! Core of a marketplace where robots claim physical-world tasks, commit to
//! their execution telemetry with a Merkle root, and get paid once an oracle
//! verifies the work.
//!
//! ## Task Flow
//! 1. A poster publishes a task (`POSTED`)
//! 2. A registered robot claims it (`CLAIMED`)
//! 3. The robot submits a Merkle root over its telemetry log (`SUBMITTED`)
//! 4. The oracle records a verdict (`VERIFIED` or `REJECTED`)
//! 5. A verified task is settled (`SETTLED`)
//!
//! Every transition is persisted through a [`store::RecordStore`] and then
//! announced on the [`events::EventBus`].
//!
//! ## Modules
//! - `digest`: pluggable string digest (djb2 by default)
//! - `merkle`: tree construction, inclusion proofs and verification
//! - `task`: task records and the lifecycle engine
//! - `registry`: robot identities and capabilities
//! - `store`: record persistence (memory, JSON file, SQLite)
//! - `pagination`: page and cursor windows over listings
//! - `telemetry`: robot-side telemetry log and root signers
//! - `sdk`: the `RoboTaskNet` facade

pub mod config;
pub mod digest;
pub mod error;
pub mod events;
pub mod merkle;
pub mod pagination;
pub mod registry;
pub mod sdk;
pub mod store;
pub mod task;
pub mod telemetry;

pub use config::Config;
pub use digest::{Digest, Djb2Digest, Hash, Sha256Digest};
pub use error::CoreError;
pub use events::{EventBus, EventKind, LifecycleEvent};
pub use merkle::{MerkleEngine, MerkleTree, Proof};
pub use registry::{RegisterRobot, Registry, Robot};
pub use sdk::{DemoOutcome, DemoRequest, RoboTaskNet};
pub use task::{PostTask, Task, TaskEngine, TaskId, TaskStatus};
