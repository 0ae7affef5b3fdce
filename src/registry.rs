//! Robot registry.
//!
//! Tracks robot identity, declared capabilities and the active flag, and
//! answers the "is this claimant registered" question for the task engine.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreError;
use crate::events::{EventBus, LifecycleEvent};
use crate::pagination::{self, CursorPage, CursorQuery, Listable, Page, PageQuery, SortValue};
use crate::store::SharedRecordStore;

/// Canonical form of one capability tag: lowercase, words joined by `-`.
///
/// `" Pick And Place "` and `"pick-and-place"` name the same capability.
pub fn capability_tag(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Canonicalise capability tags into an ordered set, first occurrence wins.
pub fn normalize_capabilities(capabilities: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    capabilities
        .iter()
        .map(|raw| capability_tag(raw))
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

/// Input to `register`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterRobot {
    pub wallet: String,
    pub public_key: String,
    #[serde(rename = "metadataURI")]
    pub metadata_uri: String,
    pub capabilities: Vec<String>,
}

/// A registered executing agent.
///
/// # Invariants
/// - `wallet` never changes after registration
/// - `reputation_score` and `staked_amount` are only carried, never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Robot {
    wallet: String,
    public_key: String,
    #[serde(rename = "metadataURI")]
    metadata_uri: String,
    capabilities: Vec<String>,
    #[serde(default)]
    reputation_score: i64,
    #[serde(default)]
    staked_amount: u64,
    #[serde(default = "default_active")]
    is_active: bool,
    registered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    version: u64,
}

fn default_active() -> bool {
    true
}

impl Robot {
    pub fn new(input: RegisterRobot, now: DateTime<Utc>) -> Self {
        Self {
            wallet: input.wallet,
            public_key: input.public_key,
            metadata_uri: input.metadata_uri,
            capabilities: normalize_capabilities(input.capabilities),
            reputation_score: 0,
            staked_amount: 0,
            is_active: true,
            registered_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn metadata_uri(&self) -> &str {
        &self.metadata_uri
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        let tag = capability_tag(capability);
        self.capabilities.iter().any(|c| *c == tag)
    }

    pub fn reputation_score(&self) -> i64 {
        self.reputation_score
    }

    pub fn staked_amount(&self) -> u64 {
        self.staked_amount
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Overwrite the descriptive fields from a re-registration.
    ///
    /// Reputation, stake, active flag and `registered_at` are preserved.
    pub fn reregister(&mut self, input: RegisterRobot, now: DateTime<Utc>) {
        self.public_key = input.public_key;
        self.metadata_uri = input.metadata_uri;
        self.capabilities = normalize_capabilities(input.capabilities);
        self.touch(now);
    }

    pub fn set_capabilities(&mut self, capabilities: Vec<String>, now: DateTime<Utc>) {
        self.capabilities = normalize_capabilities(capabilities);
        self.touch(now);
    }

    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) {
        self.is_active = active;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

impl Listable for Robot {
    fn cursor_id(&self) -> Option<String> {
        Some(self.wallet.clone())
    }

    fn sort_value(&self, field: &str) -> SortValue {
        match field {
            "wallet" | "id" => SortValue::Text(self.wallet.clone()),
            "createdAt" | "created_at" | "registeredAt" | "registered_at" => {
                SortValue::Time(self.registered_at)
            }
            "updatedAt" | "updated_at" => SortValue::Time(self.updated_at),
            "reputationScore" | "reputation_score" => SortValue::Int(self.reputation_score),
            "stakedAmount" | "staked_amount" => SortValue::Int(self.staked_amount as i64),
            _ => SortValue::Missing,
        }
    }
}

/// Filter applied before windowing robot listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RobotFilter {
    pub is_active: Option<bool>,
}

impl RobotFilter {
    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
        }
    }

    fn matches(&self, robot: &Robot) -> bool {
        self.is_active.map_or(true, |a| robot.is_active == a)
    }
}

pub struct Registry {
    store: SharedRecordStore,
    events: EventBus,
}

impl Registry {
    pub fn new(store: SharedRecordStore, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Register or re-register a robot.
    ///
    /// # Errors
    /// `InvalidArgument` if `wallet` is empty.
    pub async fn register(&self, input: RegisterRobot) -> Result<Robot, CoreError> {
        let wallet = input.wallet.trim().to_string();
        if wallet.is_empty() {
            return Err(CoreError::InvalidArgument("wallet required".to_string()));
        }
        let input = RegisterRobot { wallet, ..input };
        let now = Utc::now();

        let robot = match self.store.get_robot(&input.wallet).await? {
            Some(mut existing) => {
                let expected = existing.version();
                existing.reregister(input, now);
                self.store.save_robot(&existing, Some(expected)).await?;
                existing
            }
            None => {
                let robot = Robot::new(input, now);
                self.store.save_robot(&robot, None).await?;
                robot
            }
        };

        info!(
            wallet = %robot.wallet(),
            capabilities = robot.capabilities().len(),
            "Robot registered"
        );
        self.events
            .publish(LifecycleEvent::RobotRegistered(robot.clone()));
        Ok(robot)
    }

    /// Replace a robot's capability set.
    ///
    /// # Errors
    /// `NotFound` if the wallet is not registered.
    pub async fn update_capabilities(
        &self,
        wallet: &str,
        capabilities: Vec<String>,
    ) -> Result<Robot, CoreError> {
        self.mutate(wallet, |robot, now| robot.set_capabilities(capabilities, now))
            .await
    }

    /// Toggle whether a robot shows up as active.
    pub async fn set_active(&self, wallet: &str, active: bool) -> Result<Robot, CoreError> {
        self.mutate(wallet, |robot, now| robot.set_active(active, now))
            .await
    }

    async fn mutate<F>(&self, wallet: &str, apply: F) -> Result<Robot, CoreError>
    where
        F: FnOnce(&mut Robot, DateTime<Utc>),
    {
        let mut robot = self
            .store
            .get_robot(wallet)
            .await?
            .ok_or_else(|| CoreError::robot_not_found(wallet))?;
        let expected = robot.version();
        apply(&mut robot, Utc::now());
        self.store.save_robot(&robot, Some(expected)).await?;

        info!(wallet = %robot.wallet(), active = robot.is_active(), "Robot updated");
        self.events
            .publish(LifecycleEvent::RobotUpdated(robot.clone()));
        Ok(robot)
    }

    pub async fn get(&self, wallet: &str) -> Result<Option<Robot>, CoreError> {
        Ok(self.store.get_robot(wallet).await?)
    }

    pub async fn is_registered(&self, wallet: &str) -> Result<bool, CoreError> {
        Ok(self.store.get_robot(wallet).await?.is_some())
    }

    pub async fn list(&self, filter: &RobotFilter) -> Result<Vec<Robot>, CoreError> {
        let robots = self.store.list_robots().await?;
        Ok(robots.into_iter().filter(|r| filter.matches(r)).collect())
    }

    pub async fn paginate(
        &self,
        filter: &RobotFilter,
        query: &PageQuery,
    ) -> Result<Page<Robot>, CoreError> {
        Ok(pagination::paginate(self.list(filter).await?, query))
    }

    pub async fn cursor(
        &self,
        filter: &RobotFilter,
        query: &CursorQuery,
    ) -> Result<CursorPage<Robot>, CoreError> {
        Ok(pagination::cursor(self.list(filter).await?, query))
    }
}
