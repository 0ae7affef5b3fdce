//! SQLite-based record store with a full snapshot log.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{check_version, RecordStore, StoreError};
use crate::registry::Robot;
use crate::task::{Task, TaskId};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY NOT NULL,
    version INTEGER NOT NULL,
    record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_snapshots (
    task_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (task_id, version),
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS robots (
    wallet TEXT PRIMARY KEY NOT NULL,
    version INTEGER NOT NULL,
    record TEXT NOT NULL
);
"#;

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn join(err: tokio::task::JoinError) -> StoreError {
    StoreError::Backend(format!("Task join error: {}", err))
}

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&base_dir).await?;
        let db_path = base_dir.join("records.db");

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(backend)?;
            conn.execute_batch(SCHEMA).map_err(backend)?;
            tracing::debug!("Opened sqlite record store {}", db_path.display());
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(join)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(join)?
    }
}

fn decode_task(record: String) -> Result<Task, StoreError> {
    Ok(serde_json::from_str(&record)?)
}

fn decode_robot(record: String) -> Result<Robot, StoreError> {
    Ok(serde_json::from_str(&record)?)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn next_task_id(&self) -> Result<TaskId, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(backend)?;
            tx.execute(
                "INSERT INTO counters (name, value) VALUES ('task_id', 1)
                 ON CONFLICT(name) DO UPDATE SET value = value + 1",
                [],
            )
            .map_err(backend)?;
            let value: i64 = tx
                .query_row(
                    "SELECT value FROM counters WHERE name = 'task_id'",
                    [],
                    |row| row.get(0),
                )
                .map_err(backend)?;
            tx.commit().map_err(backend)?;
            Ok(TaskId::new(value as u64))
        })
        .await
    }

    async fn save_task(
        &self,
        task: &Task,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let record = serde_json::to_string(task)?;
        let id = task.id();
        let version = task.version() as i64;

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let found: Option<i64> = tx
                .query_row(
                    "SELECT version FROM tasks WHERE id = ?1",
                    params![id.as_u64() as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            check_version(&id.to_string(), expected_version, found.map(|v| v as u64))?;

            tx.execute(
                "INSERT INTO tasks (id, version, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     version = excluded.version,
                     record = excluded.record",
                params![id.as_u64() as i64, version, record],
            )
            .map_err(backend)?;
            tx.execute(
                "INSERT INTO task_snapshots (task_id, version, record) VALUES (?1, ?2, ?3)",
                params![id.as_u64() as i64, version, record],
            )
            .map_err(backend)?;
            tx.commit().map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM tasks WHERE id = ?1",
                    params![id.as_u64() as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            record.map(decode_task).transpose()
        })
        .await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT record FROM tasks ORDER BY id ASC")
                .map_err(backend)?;
            let records = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            records.into_iter().map(decode_task).collect()
        })
        .await
    }

    async fn task_history(&self, id: TaskId) -> Result<Vec<Task>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT record FROM task_snapshots WHERE task_id = ?1 ORDER BY version ASC",
                )
                .map_err(backend)?;
            let records = stmt
                .query_map(params![id.as_u64() as i64], |row| row.get::<_, String>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            records.into_iter().map(decode_task).collect()
        })
        .await
    }

    async fn save_robot(
        &self,
        robot: &Robot,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let record = serde_json::to_string(robot)?;
        let wallet = robot.wallet().to_string();
        let version = robot.version() as i64;

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let found: Option<i64> = tx
                .query_row(
                    "SELECT version FROM robots WHERE wallet = ?1",
                    params![&wallet],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            check_version(&wallet, expected_version, found.map(|v| v as u64))?;

            tx.execute(
                "INSERT INTO robots (wallet, version, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(wallet) DO UPDATE SET
                     version = excluded.version,
                     record = excluded.record",
                params![&wallet, version, record],
            )
            .map_err(backend)?;
            tx.commit().map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn get_robot(&self, wallet: &str) -> Result<Option<Robot>, StoreError> {
        let wallet = wallet.to_string();
        self.with_conn(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM robots WHERE wallet = ?1",
                    params![&wallet],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            record.map(decode_robot).transpose()
        })
        .await
    }

    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT record FROM robots ORDER BY wallet ASC")
                .map_err(backend)?;
            let records = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            records.into_iter().map(decode_robot).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    async fn open(dir: &tempfile::TempDir) -> SqliteRecordStore {
        SqliteRecordStore::new(dir.path().to_path_buf())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn satisfies_store_contract() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = open(&temp).await;
        contract::ids_are_monotonic(&store).await;
        contract::task_cas_and_history(&store).await;
        contract::robot_cas(&store).await;
    }

    #[tokio::test]
    async fn lists_tasks_in_id_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        contract::lists_tasks_in_id_order(&open(&temp).await).await;
    }

    #[tokio::test]
    async fn counter_and_history_survive_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let id = {
            let store = open(&temp).await;
            let id = store.next_task_id().await.unwrap();
            store.save_task(&contract::sample_task(id), None).await.unwrap();
            id
        };

        let store = open(&temp).await;
        assert_eq!(store.task_history(id).await.unwrap().len(), 1);
        assert!(store.next_task_id().await.unwrap() > id);
    }
}
