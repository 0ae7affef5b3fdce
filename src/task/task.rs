//! Core Task type and its lifecycle transitions.
//!
//! # State Machine
//! ```text
//! Posted -> Claimed -> Submitted -> Verified -> Settled
//!                                \-> Rejected
//! ```
//!
//! # Invariants
//! - `version` increases by one on every applied transition
//! - Under [`ClaimPolicy::Strict`] each optional field is written exactly once,
//!   by the transition that introduces it

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::commitment::{TelemetryCommitment, VerificationOutcome};
use crate::config::ClaimPolicy;
use crate::error::CoreError;
use crate::pagination::{Listable, SortValue};

/// Process-scoped monotonic task identifier, rendered as `T<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('T')
            .and_then(|n| n.parse::<u64>().ok())
            .map(TaskId)
            .ok_or_else(|| CoreError::InvalidArgument(format!("malformed task id: {}", s)))
    }
}

impl TryFrom<String> for TaskId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Posted,
    Claimed,
    Submitted,
    Verified,
    Rejected,
    Settled,
}

impl TaskStatus {
    /// `Settled` and `Rejected` accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Settled | TaskStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Posted => "POSTED",
            TaskStatus::Claimed => "CLAIMED",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Verified => "VERIFIED",
            TaskStatus::Rejected => "REJECTED",
            TaskStatus::Settled => "SETTLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "POSTED" => Ok(TaskStatus::Posted),
            "CLAIMED" => Ok(TaskStatus::Claimed),
            "SUBMITTED" => Ok(TaskStatus::Submitted),
            "VERIFIED" => Ok(TaskStatus::Verified),
            "REJECTED" => Ok(TaskStatus::Rejected),
            "SETTLED" => Ok(TaskStatus::Settled),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// Input to `post`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostTask {
    pub title: String,
    pub description: String,
    pub reward_amount: u64,
    /// Falls back to the configured native ticker
    pub token: Option<String>,
    pub params: Value,
}

/// A unit of work posted for a robot to claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    title: String,
    description: String,
    reward_amount: u64,
    token: String,
    #[serde(default)]
    params: Value,
    created_at: DateTime<Utc>,
    status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    telemetry: Option<TelemetryCommitment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verification: Option<VerificationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    version: u64,
}

impl Task {
    /// Create a freshly posted task.
    ///
    /// # Postconditions
    /// - `status == Posted`, `version == 0`
    /// - all lifecycle fields are `None`
    pub fn new(id: TaskId, input: PostTask, native_token: &str, now: DateTime<Utc>) -> Self {
        let token = input
            .token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| native_token.to_string());
        Self {
            id,
            title: input.title,
            description: input.description,
            reward_amount: input.reward_amount,
            token,
            params: input.params,
            created_at: now,
            status: TaskStatus::Posted,
            claimed_by: None,
            claimed_at: None,
            telemetry: None,
            verification: None,
            settled_at: None,
            version: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reward_amount(&self) -> u64 {
        self.reward_amount
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn claimed_by(&self) -> Option<&str> {
        self.claimed_by.as_deref()
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    pub fn telemetry(&self) -> Option<&TelemetryCommitment> {
        self.telemetry.as_ref()
    }

    pub fn verification(&self) -> Option<&VerificationOutcome> {
        self.verification.as_ref()
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settled_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn require(&self, expected: TaskStatus, to: TaskStatus) -> Result<(), CoreError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            })
        }
    }

    // State transitions - explicit and validated

    /// Record `wallet` as claimant.
    ///
    /// # Precondition (strict)
    /// `self.status == Posted`
    pub fn claim(
        &mut self,
        wallet: &str,
        policy: ClaimPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if policy.is_strict() {
            self.require(TaskStatus::Posted, TaskStatus::Claimed)?;
        }
        self.status = TaskStatus::Claimed;
        self.claimed_by = Some(wallet.to_string());
        self.claimed_at = Some(now);
        self.version += 1;
        Ok(())
    }

    /// Attach the robot's telemetry commitment.
    ///
    /// # Precondition (strict)
    /// `self.status == Claimed`
    pub fn submit_telemetry(
        &mut self,
        commitment: TelemetryCommitment,
        policy: ClaimPolicy,
    ) -> Result<(), CoreError> {
        if policy.is_strict() {
            self.require(TaskStatus::Claimed, TaskStatus::Submitted)?;
        }
        self.status = TaskStatus::Submitted;
        self.telemetry = Some(commitment);
        self.version += 1;
        Ok(())
    }

    /// Record the oracle's outcome: `Verified` if `ok`, else `Rejected`.
    ///
    /// # Preconditions
    /// - a telemetry commitment is present
    /// - (strict) `self.status == Submitted`
    pub fn verify(
        &mut self,
        ok: bool,
        proof: Value,
        policy: ClaimPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.telemetry.is_none() {
            return Err(CoreError::TelemetryMissing(self.id));
        }
        let next = if ok {
            TaskStatus::Verified
        } else {
            TaskStatus::Rejected
        };
        if policy.is_strict() {
            self.require(TaskStatus::Submitted, next)?;
        }
        self.status = next;
        self.verification = Some(VerificationOutcome {
            ok,
            proof,
            verified_at: now,
        });
        self.version += 1;
        Ok(())
    }

    /// Mark the reward as settled.
    ///
    /// # Precondition
    /// `self.status == Verified`, regardless of policy
    pub fn settle(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != TaskStatus::Verified {
            return Err(CoreError::NotVerified(self.id));
        }
        self.status = TaskStatus::Settled;
        self.settled_at = Some(now);
        self.version += 1;
        Ok(())
    }
}

fn time(ts: Option<DateTime<Utc>>) -> SortValue {
    ts.map_or(SortValue::Missing, SortValue::Time)
}

impl Listable for Task {
    fn cursor_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }

    /// Later ids win ties, matching posting order.
    fn tie_break(&self) -> SortValue {
        SortValue::Int(self.id.0 as i64)
    }

    fn sort_value(&self, field: &str) -> SortValue {
        match field {
            "id" => SortValue::Int(self.id.0 as i64),
            "createdAt" | "created_at" => time(Some(self.created_at)),
            "claimedAt" | "claimed_at" => time(self.claimed_at),
            "settledAt" | "settled_at" => time(self.settled_at),
            "submittedAt" | "submitted_at" => {
                time(self.telemetry.as_ref().map(|t| t.submitted_at))
            }
            "verifiedAt" | "verified_at" => {
                time(self.verification.as_ref().map(|v| v.verified_at))
            }
            "rewardAmount" | "reward_amount" => SortValue::Int(self.reward_amount as i64),
            "title" => SortValue::Text(self.title.clone()),
            "token" => SortValue::Text(self.token.clone()),
            "status" => SortValue::Text(self.status.to_string()),
            "version" => SortValue::Int(self.version as i64),
            _ => SortValue::Missing,
        }
    }
}
