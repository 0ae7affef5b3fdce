//! `RoboTaskNet` facade.
//!
//! Wires one record store, the robot registry, the task engine, a Merkle
//! engine, a telemetry signer and the event bus together from a [`Config`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::digest::Hash;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::merkle::{MerkleEngine, MerkleTree, Proof};
use crate::registry::Registry;
use crate::store::{create_record_store, SharedRecordStore};
use crate::task::{PostTask, Task, TaskEngine};
use crate::telemetry::{HmacSigner, MockSigner, Signer};

/// Metadata URI attached to demo telemetry submissions.
pub const DEMO_METADATA_URI: &str = "ipfs://mock";

/// Input to [`RoboTaskNet::demo_flow`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemoRequest {
    pub title: String,
    pub description: String,
    pub reward_amount: u64,
    pub robot_wallet: String,
    pub telemetry_entries: Vec<Value>,
}

/// Every intermediate snapshot of a demo run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoOutcome {
    pub task: Task,
    pub claimed: Task,
    pub root: Hash,
    pub sig: String,
    pub submitted: Task,
    pub verified: Task,
    pub settled: Task,
}

pub struct RoboTaskNet {
    config: Config,
    store: SharedRecordStore,
    events: EventBus,
    registry: Arc<Registry>,
    tasks: TaskEngine,
    merkle: MerkleEngine,
    signer: Arc<dyn Signer>,
}

impl RoboTaskNet {
    /// Open the configured store and build the facade around it.
    pub async fn new(config: Config) -> Result<Self, CoreError> {
        let store = create_record_store(config.store_type, config.data_dir.clone()).await?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: SharedRecordStore) -> Result<Self, CoreError> {
        let events = EventBus::new(config.event_capacity);
        let registry = Arc::new(Registry::new(store.clone(), events.clone()));
        let tasks = TaskEngine::new(
            store.clone(),
            registry.clone(),
            events.clone(),
            config.claim_policy,
            config.native_token.clone(),
        );
        let merkle = MerkleEngine::new(config.digest.build());
        let signer: Arc<dyn Signer> = match config.signing_key.as_deref() {
            Some(key) => Arc::new(HmacSigner::new(key)?),
            None => Arc::new(MockSigner),
        };

        info!(
            persistent = store.is_persistent(),
            digest = merkle.digest().name(),
            policy = ?config.claim_policy,
            "RoboTaskNet initialised"
        );

        Ok(Self {
            config,
            store,
            events,
            registry,
            tasks,
            merkle,
            signer,
        })
    }

    /// Replace the telemetry signer.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    pub fn tasks(&self) -> &TaskEngine {
        &self.tasks
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn merkle(&self) -> &MerkleEngine {
        &self.merkle
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn build_merkle_root<T: Serialize>(&self, entries: &[T]) -> Result<Option<Hash>, CoreError> {
        self.merkle.root(entries)
    }

    pub fn build_merkle_tree<T: Serialize>(&self, entries: &[T]) -> Result<MerkleTree, CoreError> {
        self.merkle.build_tree(entries)
    }

    pub fn build_proof_for_entry<T: Serialize>(
        &self,
        entries: &[T],
        index: usize,
    ) -> Result<Proof, CoreError> {
        self.merkle.proof(entries, index)
    }

    pub async fn sign_telemetry_root(&self, root: &Hash) -> Result<String, CoreError> {
        self.signer.sign_root(root).await
    }

    /// Drive one task through the whole lifecycle with a positive verdict.
    ///
    /// The robot must already be registered.
    ///
    /// # Errors
    /// `InvalidArgument` if there are no telemetry entries to commit, plus
    /// anything the individual lifecycle operations return.
    pub async fn demo_flow(&self, request: DemoRequest) -> Result<DemoOutcome, CoreError> {
        let task = self
            .tasks
            .post(PostTask {
                title: request.title,
                description: request.description,
                reward_amount: request.reward_amount,
                token: None,
                params: Value::Null,
            })
            .await?;
        let claimed = self.tasks.claim(task.id(), &request.robot_wallet).await?;

        let root = self
            .build_merkle_root(&request.telemetry_entries)?
            .ok_or_else(|| CoreError::InvalidArgument("telemetry entries required".to_string()))?;
        let sig = self.sign_telemetry_root(&root).await?;

        let submitted = self
            .tasks
            .submit_telemetry(task.id(), root.clone(), sig.clone(), DEMO_METADATA_URI)
            .await?;
        let verified = self
            .tasks
            .verify(task.id(), true, json!({"reason": "demo-ok"}))
            .await?;
        let settled = self.tasks.settle(task.id()).await?;

        info!(task = %settled.id(), root = %root, "Demo flow settled");
        Ok(DemoOutcome {
            task,
            claimed,
            root,
            sig,
            submitted,
            verified,
            settled,
        })
    }
}
