//! JSON file-based record store.
//!
//! The whole state lives in memory and is rewritten to `records.json`
//! (tmp file + rename) after every successful save.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use super::{check_version, RecordStore, StoreError};
use crate::registry::Robot;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordSnapshot {
    #[serde(default)]
    last_task_id: u64,
    #[serde(default)]
    tasks: BTreeMap<TaskId, Vec<Task>>,
    #[serde(default)]
    robots: BTreeMap<String, Robot>,
}

#[derive(Clone)]
pub struct FileRecordStore {
    path: PathBuf,
    state: Arc<RwLock<RecordSnapshot>>,
}

impl FileRecordStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_dir).await?;
        let path = base_dir.join("records.json");
        let snapshot = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<RecordSnapshot>(&bytes) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!("Failed to parse record store {}: {}", path.display(), e);
                    RecordSnapshot::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RecordSnapshot::default(),
            Err(err) => {
                tracing::warn!("Failed to read record store {}: {}", path.display(), err);
                RecordSnapshot::default()
            }
        };
        tracing::debug!(
            "Opened record store {} ({} tasks, {} robots)",
            path.display(),
            snapshot.tasks.len(),
            snapshot.robots.len()
        );

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(snapshot)),
        })
    }

    async fn write_snapshot(&self, snapshot: &RecordSnapshot) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the state, write the copy, then swap it in.
    ///
    /// The write lock is held across the disk write, so writers are
    /// serialised and a failed write leaves the visible state untouched.
    async fn commit<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RecordSnapshot) -> Result<T, StoreError>,
    {
        let mut state = self.state.write().await;
        let mut candidate = state.clone();
        let out = change(&mut candidate)?;
        self.write_snapshot(&candidate).await?;
        *state = candidate;
        Ok(out)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn next_task_id(&self) -> Result<TaskId, StoreError> {
        self.commit(|state| {
            state.last_task_id += 1;
            Ok(TaskId::new(state.last_task_id))
        })
        .await
    }

    async fn save_task(
        &self,
        task: &Task,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        self.commit(|state| {
            let found = state
                .tasks
                .get(&task.id())
                .and_then(|history| history.last())
                .map(Task::version);
            check_version(&task.id().to_string(), expected_version, found)?;
            state.tasks.entry(task.id()).or_default().push(task.clone());
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .get(&id)
            .and_then(|history| history.last().cloned()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .values()
            .filter_map(|history| history.last().cloned())
            .collect())
    }

    async fn task_history(&self, id: TaskId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_robot(
        &self,
        robot: &Robot,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        self.commit(|state| {
            let found = state.robots.get(robot.wallet()).map(Robot::version);
            check_version(robot.wallet(), expected_version, found)?;
            state
                .robots
                .insert(robot.wallet().to_string(), robot.clone());
            Ok(())
        })
        .await
    }

    async fn get_robot(&self, wallet: &str) -> Result<Option<Robot>, StoreError> {
        Ok(self.state.read().await.robots.get(wallet).cloned())
    }

    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError> {
        Ok(self.state.read().await.robots.values().cloned().collect())
    }
}
