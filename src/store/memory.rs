//! In-memory record store (non-persistent).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_version, RecordStore, StoreError};
use crate::registry::Robot;
use crate::task::{Task, TaskId};

#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    /// Snapshots per task; the last entry is current.
    tasks: Arc<RwLock<BTreeMap<TaskId, Vec<Task>>>>,
    robots: Arc<RwLock<BTreeMap<String, Robot>>>,
    last_task_id: Arc<AtomicU64>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn next_task_id(&self) -> Result<TaskId, StoreError> {
        let n = self.last_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TaskId::new(n))
    }

    async fn save_task(
        &self,
        task: &Task,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let found = tasks
            .get(&task.id())
            .and_then(|history| history.last())
            .map(Task::version);
        check_version(&task.id().to_string(), expected_version, found)?;
        tasks.entry(task.id()).or_default().push(task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .get(&id)
            .and_then(|history| history.last().cloned()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter_map(|history| history.last().cloned())
            .collect())
    }

    async fn task_history(&self, id: TaskId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_robot(
        &self,
        robot: &Robot,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut robots = self.robots.write().await;
        let found = robots.get(robot.wallet()).map(Robot::version);
        check_version(robot.wallet(), expected_version, found)?;
        robots.insert(robot.wallet().to_string(), robot.clone());
        Ok(())
    }

    async fn get_robot(&self, wallet: &str) -> Result<Option<Robot>, StoreError> {
        Ok(self.robots.read().await.get(wallet).cloned())
    }

    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError> {
        Ok(self.robots.read().await.values().cloned().collect())
    }
}
