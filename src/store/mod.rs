//! Record storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: JSON snapshot file
//! - `sqlite`: SQLite database with a per-transition snapshot table
//!
//! Every save is compare-and-swap on the record's `version`, which is how
//! concurrent mutations to the same task or robot are serialised. Task saves
//! also append an immutable snapshot to the task's history.

mod file;
mod memory;
mod sqlite;

pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::Robot;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Version conflict on {key}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Check a compare-and-swap precondition.
///
/// `expected == None` means "create"; the record must not exist yet.
pub(crate) fn check_version(
    key: &str,
    expected: Option<u64>,
    found: Option<u64>,
) -> Result<(), StoreError> {
    match (expected, found) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(StoreError::AlreadyExists(key.to_string())),
        (Some(e), Some(f)) if e == f => Ok(()),
        (expected, found) => Err(StoreError::VersionConflict {
            key: key.to_string(),
            expected,
            found,
        }),
    }
}

/// Record store trait - implemented by all storage backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Allocate the next task id. Never returns the same id twice.
    async fn next_task_id(&self) -> Result<TaskId, StoreError>;

    /// Create (`expected_version == None`) or compare-and-swap a task.
    async fn save_task(&self, task: &Task, expected_version: Option<u64>)
        -> Result<(), StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// All tasks, in id order.
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Every saved snapshot of a task, oldest first.
    async fn task_history(&self, id: TaskId) -> Result<Vec<Task>, StoreError>;

    /// Create (`expected_version == None`) or compare-and-swap a robot.
    async fn save_robot(
        &self,
        robot: &Robot,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError>;

    async fn get_robot(&self, wallet: &str) -> Result<Option<Robot>, StoreError>;

    /// All robots, in wallet order.
    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError>;
}

pub type SharedRecordStore = Arc<dyn RecordStore>;

/// Record store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordStoreType {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl RecordStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" => Self::Memory,
            "file" | "json" => Self::File,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Create a record store based on type and data directory.
pub async fn create_record_store(
    store_type: RecordStoreType,
    data_dir: PathBuf,
) -> Result<SharedRecordStore, StoreError> {
    match store_type {
        RecordStoreType::Memory => Ok(Arc::new(InMemoryRecordStore::new())),
        RecordStoreType::File => {
            let store = FileRecordStore::new(data_dir).await?;
            Ok(Arc::new(store))
        }
        RecordStoreType::Sqlite => {
            let store = SqliteRecordStore::new(data_dir).await?;
            Ok(Arc::new(store))
        }
    }
}
