//! Task lifecycle engine.
//!
//! Each operation loads the current record, applies one pure transition from
//! [`Task`], persists it with a compare-and-swap on the previous version,
//! and only then publishes the matching event.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::commitment::TelemetryCommitment;
use super::task::{PostTask, Task, TaskId, TaskStatus};
use crate::config::ClaimPolicy;
use crate::digest::Hash;
use crate::error::CoreError;
use crate::events::{EventBus, LifecycleEvent};
use crate::pagination::{self, CursorPage, CursorQuery, Page, PageQuery};
use crate::registry::Registry;
use crate::store::SharedRecordStore;

/// Filter applied before windowing task listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub token: Option<String>,
}

impl TaskFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            token: None,
        }
    }

    fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status() == s)
            && self.token.as_deref().map_or(true, |t| task.token() == t)
    }
}

pub struct TaskEngine {
    store: SharedRecordStore,
    registry: Arc<Registry>,
    events: EventBus,
    policy: ClaimPolicy,
    native_token: String,
}

impl TaskEngine {
    pub fn new(
        store: SharedRecordStore,
        registry: Arc<Registry>,
        events: EventBus,
        policy: ClaimPolicy,
        native_token: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            policy,
            native_token: native_token.into(),
        }
    }

    pub fn policy(&self) -> ClaimPolicy {
        self.policy
    }

    async fn load(&self, id: TaskId) -> Result<Task, CoreError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| CoreError::task_not_found(id))
    }

    /// Persist a transitioned task that was loaded at `expected` version.
    async fn commit(
        &self,
        task: Task,
        expected: u64,
        event: fn(Task) -> LifecycleEvent,
    ) -> Result<Task, CoreError> {
        self.store.save_task(&task, Some(expected)).await?;
        info!(task = %task.id(), status = %task.status(), version = task.version(), "Task transitioned");
        self.events.publish(event(task.clone()));
        Ok(task)
    }

    pub async fn post(&self, input: PostTask) -> Result<Task, CoreError> {
        let id = self.store.next_task_id().await?;
        let task = Task::new(id, input, &self.native_token, Utc::now());
        self.store.save_task(&task, None).await?;

        info!(task = %task.id(), token = %task.token(), reward = task.reward_amount(), "Task posted");
        self.events.publish(LifecycleEvent::TaskPosted(task.clone()));
        Ok(task)
    }

    /// # Errors
    /// - `NotFound` if the task does not exist
    /// - `NotRegistered` if `robot_wallet` is not in the registry
    /// - `InvalidTransition` under the strict policy unless the task is `POSTED`
    pub async fn claim(&self, id: TaskId, robot_wallet: &str) -> Result<Task, CoreError> {
        let mut task = self.load(id).await?;
        if !self.registry.is_registered(robot_wallet).await? {
            return Err(CoreError::NotRegistered(robot_wallet.to_string()));
        }
        let expected = task.version();
        task.claim(robot_wallet, self.policy, Utc::now())?;
        self.commit(task, expected, LifecycleEvent::TaskClaimed)
            .await
    }

    /// Attach a telemetry commitment. The signature is stored, not checked.
    pub async fn submit_telemetry(
        &self,
        id: TaskId,
        root: Hash,
        signature: impl Into<String>,
        metadata_uri: impl Into<String>,
    ) -> Result<Task, CoreError> {
        let mut task = self.load(id).await?;
        let expected = task.version();
        let commitment = TelemetryCommitment {
            root,
            signature: signature.into(),
            metadata_uri: metadata_uri.into(),
            submitted_at: Utc::now(),
        };
        task.submit_telemetry(commitment, self.policy)?;
        self.commit(task, expected, LifecycleEvent::TelemetrySubmitted)
            .await
    }

    /// Record the oracle's judgement.
    ///
    /// # Errors
    /// - `NotFound` if the task does not exist
    /// - `TelemetryMissing` if no commitment has been submitted
    pub async fn verify(&self, id: TaskId, ok: bool, proof: Value) -> Result<Task, CoreError> {
        let mut task = self.load(id).await?;
        let expected = task.version();
        task.verify(ok, proof, self.policy, Utc::now())?;
        self.commit(task, expected, LifecycleEvent::TaskVerified)
            .await
    }

    /// Mark a verified task as settled. No value is transferred here.
    ///
    /// # Errors
    /// `NotVerified` unless the task is exactly `VERIFIED`.
    pub async fn settle(&self, id: TaskId) -> Result<Task, CoreError> {
        let mut task = self.load(id).await?;
        let expected = task.version();
        task.settle(Utc::now())?;
        self.commit(task, expected, LifecycleEvent::PaymentSettled)
            .await
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, CoreError> {
        Ok(self.store.get_task(id).await?)
    }

    /// Every persisted snapshot of a task, one per transition.
    pub async fn history(&self, id: TaskId) -> Result<Vec<Task>, CoreError> {
        Ok(self.store.task_history(id).await?)
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, CoreError> {
        let tasks = self.store.list_tasks().await?;
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    pub async fn paginate(
        &self,
        filter: &TaskFilter,
        query: &PageQuery,
    ) -> Result<Page<Task>, CoreError> {
        Ok(pagination::paginate(self.list(filter).await?, query))
    }

    pub async fn cursor(
        &self,
        filter: &TaskFilter,
        query: &CursorQuery,
    ) -> Result<CursorPage<Task>, CoreError> {
        Ok(pagination::cursor(self.list(filter).await?, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::registry::RegisterRobot;
    use crate::store::InMemoryRecordStore;
    use serde_json::json;
    use std::sync::Mutex;

    struct Harness {
        engine: TaskEngine,
        registry: Arc<Registry>,
        events: EventBus,
    }

    fn harness(policy: ClaimPolicy) -> Harness {
        let store: SharedRecordStore = Arc::new(InMemoryRecordStore::new());
        let events = EventBus::new(64);
        let registry = Arc::new(Registry::new(store.clone(), events.clone()));
        Harness {
            engine: TaskEngine::new(store, registry.clone(), events.clone(), policy, "$RTN"),
            registry,
            events,
        }
    }

    async fn register(h: &Harness, wallet: &str) {
        h.registry
            .register(RegisterRobot {
                wallet: wallet.into(),
                ..RegisterRobot::default()
            })
            .await
            .unwrap();
    }

    fn job(title: &str) -> PostTask {
        PostTask {
            title: title.into(),
            description: "deliver parcel".into(),
            reward_amount: 100,
            token: None,
            params: json!({"zone": "B"}),
        }
    }

    #[tokio::test]
    async fn post_allocates_fresh_ids() {
        let h = harness(ClaimPolicy::Strict);
        let a = h.engine.post(job("a")).await.unwrap();
        let b = h.engine.post(job("b")).await.unwrap();
        assert_eq!(a.id(), TaskId::new(1));
        assert_eq!(b.id(), TaskId::new(2));
        assert_eq!(a.status(), TaskStatus::Posted);
        assert_eq!(a.token(), "$RTN");
    }

    #[tokio::test]
    async fn claim_checks_existence_then_registration() {
        let h = harness(ClaimPolicy::Strict);
        let err = h.engine.claim(TaskId::new(7), "0xghost").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let task = h.engine.post(job("a")).await.unwrap();
        let err = h.engine.claim(task.id(), "0xghost").await.unwrap_err();
        assert_eq!(err, CoreError::NotRegistered("0xghost".into()));
        assert_eq!(
            h.engine.get(task.id()).await.unwrap().unwrap().status(),
            TaskStatus::Posted
        );
    }

    #[tokio::test]
    async fn settle_before_verify_fails() {
        let h = harness(ClaimPolicy::Strict);
        register(&h, "0xbot").await;
        let task = h.engine.post(job("a")).await.unwrap();
        h.engine.claim(task.id(), "0xbot").await.unwrap();
        let err = h.engine.settle(task.id()).await.unwrap_err();
        assert_eq!(err, CoreError::NotVerified(task.id()));
    }

    #[tokio::test]
    async fn verify_before_submit_fails() {
        let h = harness(ClaimPolicy::Permissive);
        let task = h.engine.post(job("a")).await.unwrap();
        let err = h
            .engine
            .verify(task.id(), true, Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::TelemetryMissing(task.id()));
    }

    #[tokio::test]
    async fn strict_policy_blocks_out_of_order_transitions() {
        let h = harness(ClaimPolicy::Strict);
        register(&h, "0xa").await;
        register(&h, "0xb").await;
        let task = h.engine.post(job("a")).await.unwrap();

        let err = h
            .engine
            .submit_telemetry(task.id(), Hash::from_hex("0x01"), "sig", "ipfs://x")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        h.engine.claim(task.id(), "0xa").await.unwrap();
        let err = h.engine.claim(task.id(), "0xb").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        h.engine
            .submit_telemetry(task.id(), Hash::from_hex("0x01"), "sig", "ipfs://x")
            .await
            .unwrap();
        h.engine
            .verify(task.id(), true, Value::Null)
            .await
            .unwrap();
        let err = h
            .engine
            .verify(task.id(), false, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn permissive_policy_allows_reclaim() {
        let h = harness(ClaimPolicy::Permissive);
        register(&h, "0xa").await;
        register(&h, "0xb").await;
        let task = h.engine.post(job("a")).await.unwrap();
        h.engine.claim(task.id(), "0xa").await.unwrap();
        let task = h.engine.claim(task.id(), "0xb").await.unwrap();
        assert_eq!(task.claimed_by(), Some("0xb"));
    }

    #[tokio::test]
    async fn rejected_and_settled_tasks_cannot_settle() {
        let h = harness(ClaimPolicy::Strict);
        register(&h, "0xbot").await;

        let rejected = h.engine.post(job("r")).await.unwrap();
        h.engine.claim(rejected.id(), "0xbot").await.unwrap();
        h.engine
            .submit_telemetry(rejected.id(), Hash::from_hex("0x01"), "sig", "ipfs://r")
            .await
            .unwrap();
        let outcome = h
            .engine
            .verify(rejected.id(), false, json!({"reason": "gap in log"}))
            .await
            .unwrap();
        assert_eq!(outcome.status(), TaskStatus::Rejected);
        assert!(h.engine.settle(rejected.id()).await.is_err());

        let settled = h.engine.post(job("s")).await.unwrap();
        h.engine.claim(settled.id(), "0xbot").await.unwrap();
        h.engine
            .submit_telemetry(settled.id(), Hash::from_hex("0x02"), "sig", "ipfs://s")
            .await
            .unwrap();
        h.engine
            .verify(settled.id(), true, Value::Null)
            .await
            .unwrap();
        h.engine.settle(settled.id()).await.unwrap();
        assert_eq!(
            h.engine.settle(settled.id()).await.unwrap_err(),
            CoreError::NotVerified(settled.id())
        );
    }

    #[tokio::test]
    async fn every_transition_emits_and_snapshots() {
        let h = harness(ClaimPolicy::Strict);
        register(&h, "0xbot").await;
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        h.events.subscribe_fn(None, move |e| {
            if e.task().is_some() {
                sink.lock().unwrap().push(e.kind());
            }
            Ok(())
        });
        // A broken listener must not abort any transition.
        h.events.subscribe_fn(None, |_| anyhow::bail!("sink offline"));

        let task = h.engine.post(job("a")).await.unwrap();
        h.engine.claim(task.id(), "0xbot").await.unwrap();
        h.engine
            .submit_telemetry(task.id(), Hash::from_hex("0x01"), "sig", "ipfs://a")
            .await
            .unwrap();
        h.engine
            .verify(task.id(), true, Value::Null)
            .await
            .unwrap();
        let done = h.engine.settle(task.id()).await.unwrap();

        assert_eq!(done.status(), TaskStatus::Settled);
        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                EventKind::TaskPosted,
                EventKind::TaskClaimed,
                EventKind::TelemetrySubmitted,
                EventKind::TaskVerified,
                EventKind::PaymentSettled,
            ]
        );

        let history = h.engine.history(task.id()).await.unwrap();
        let statuses: Vec<TaskStatus> = history.iter().map(Task::status).collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Posted,
                TaskStatus::Claimed,
                TaskStatus::Submitted,
                TaskStatus::Verified,
                TaskStatus::Settled,
            ]
        );
        // Earlier snapshots are untouched by later transitions.
        assert!(history[1].telemetry().is_none());
        assert!(history[2].verification().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_status_and_token() {
        let h = harness(ClaimPolicy::Strict);
        register(&h, "0xbot").await;
        let a = h.engine.post(job("a")).await.unwrap();
        h.engine
            .post(PostTask {
                token: Some("USDC".into()),
                ..job("b")
            })
            .await
            .unwrap();
        h.engine.claim(a.id(), "0xbot").await.unwrap();

        let claimed = h
            .engine
            .list(&TaskFilter::status(TaskStatus::Claimed))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id(), a.id());

        let usdc = h
            .engine
            .paginate(
                &TaskFilter {
                    token: Some("USDC".into()),
                    ..TaskFilter::default()
                },
                &PageQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(usdc.total, 1);
        assert_eq!(usdc.items[0].title(), "b");
    }

    #[tokio::test]
    async fn paginates_twenty_five_tasks() {
        let h = harness(ClaimPolicy::Strict);
        for i in 0..25 {
            h.engine.post(job(&format!("t{}", i))).await.unwrap();
        }
        let filter = TaskFilter::default();

        let page = h
            .engine
            .paginate(&filter, &PageQuery::page(1, 10))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total_pages, 3);

        let page = h
            .engine
            .paginate(&filter, &PageQuery::page(5, 10))
            .await
            .unwrap();
        assert_eq!(page.page, 3);
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn cursor_by_id_descending() {
        let h = harness(ClaimPolicy::Strict);
        for t in ["A", "B", "C"] {
            h.engine.post(job(t)).await.unwrap();
        }
        let filter = TaskFilter::default();
        let query = CursorQuery::after(None, 2).ordered_by("id", pagination::SortOrder::Desc);

        let first = h.engine.cursor(&filter, &query).await.unwrap();
        let titles: Vec<&str> = first.items.iter().map(Task::title).collect();
        assert_eq!(titles, vec!["C", "B"]);
        assert_eq!(first.next_cursor.as_deref(), Some("T2"));
        assert!(first.has_next);

        let query = CursorQuery {
            cursor: first.next_cursor,
            ..query
        };
        let second = h.engine.cursor(&filter, &query).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].title(), "A");
        assert!(!second.has_next);
    }

    #[tokio::test]
    async fn default_listing_is_newest_first() {
        let h = harness(ClaimPolicy::Strict);
        for t in ["A", "B", "C"] {
            h.engine.post(job(t)).await.unwrap();
        }
        let filter = TaskFilter::default();

        let first = h
            .engine
            .cursor(&filter, &CursorQuery::after(None, 2))
            .await
            .unwrap();
        let titles: Vec<&str> = first.items.iter().map(Task::title).collect();
        assert_eq!(titles, vec!["C", "B"]);
        assert_eq!(first.next_cursor.as_deref(), Some("T2"));
        assert!(first.has_next);

        let page = h
            .engine
            .paginate(&filter, &PageQuery::default())
            .await
            .unwrap();
        let titles: Vec<&str> = page.items.iter().map(Task::title).collect();
        assert_eq!(titles, vec!["C", "B", "A"]);
    }
}
