//! Change events and rollout state shared by the registry, the change
//! stream, and the update orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::PolicyManifest;

/// Kind of event a [`ChangeEvent`] reports: either a registry lifecycle
/// mutation or an evaluation-pipeline outcome, per spec.md §6's single
/// `kernel.policy.*` topic list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventKind {
    /// A new policy was registered.
    Created,
    /// An existing policy was re-registered (upsert).
    Updated,
    /// A policy was removed via the update orchestrator.
    Deleted,
    /// A policy was enabled.
    Enabled,
    /// A policy was disabled.
    Disabled,
    /// An evaluation completed, regardless of outcome.
    Evaluated,
    /// An evaluation denied the request.
    Violated,
    /// An evaluation's resolver flagged a precedence conflict.
    #[serde(rename = "conflict_resolved")]
    ConflictResolved,
}

impl ChangeEventKind {
    /// The `kernel.policy.<kind>` event name used on the abstract transport.
    #[must_use]
    pub fn topic(self) -> &'static str {
        match self {
            Self::Created => "kernel.policy.created",
            Self::Updated => "kernel.policy.updated",
            Self::Deleted => "kernel.policy.deleted",
            Self::Enabled => "kernel.policy.enabled",
            Self::Disabled => "kernel.policy.disabled",
            Self::Evaluated => "kernel.policy.evaluated",
            Self::Violated => "kernel.policy.violated",
            Self::ConflictResolved => "kernel.policy.conflict_resolved",
        }
    }
}

/// Lifecycle notification emitted on every mutation of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// What kind of mutation occurred.
    #[serde(rename = "type")]
    pub kind: ChangeEventKind,
    /// Affected policy id.
    pub policy_id: String,
    /// Manifest snapshot, when the event carries one (absent on `deleted`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyManifest>,
    /// Hash of the manifest version preceding this change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Hash of the manifest version this change establishes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    /// Milliseconds since UNIX epoch when the event was produced.
    pub timestamp: u64,
    /// Identifier of the node that produced the event.
    pub source_node_id: String,
    /// Free-form metadata (e.g. a disable reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Strategy an update-orchestrator rollout follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutStrategy {
    /// Invalidate, publish, mark complete in one step. Fully specified.
    Immediate,
    /// Staged rollout to a subset of nodes first. Reserved, not implemented.
    Canary,
    /// Rollout deferred to a future time. Reserved, not implemented.
    Scheduled,
    /// Rollout gated on an external approval step. Reserved, not implemented.
    Manual,
}

/// Status of a tracked rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RolloutStatus {
    /// Created, not yet started.
    Pending,
    /// Actively propagating.
    InProgress,
    /// Propagated to completion.
    Completed,
    /// Propagation failed.
    Failed,
    /// Reverted after completion by an external trigger.
    RolledBack,
}

/// Counters describing how far a rollout has propagated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutProgress {
    /// Total subscribers/nodes targeted.
    pub total: u64,
    /// Subscribers/nodes that acknowledged the update.
    pub updated: u64,
    /// Subscribers/nodes that failed to apply the update.
    pub failed: u64,
}

/// Immutable snapshot of a policy rollout's state. Transitions produce a
/// new value rather than mutating one in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutState {
    /// Policy this rollout tracks.
    pub policy_id: String,
    /// Strategy in effect.
    pub strategy: RolloutStrategy,
    /// Propagation counters.
    pub progress: RolloutProgress,
    /// Current status.
    pub status: RolloutStatus,
}

impl RolloutState {
    /// Start a new pending rollout for `policy_id` under `strategy`.
    #[must_use]
    pub fn pending(policy_id: impl Into<String>, strategy: RolloutStrategy) -> Self {
        Self {
            policy_id: policy_id.into(),
            strategy,
            progress: RolloutProgress::default(),
            status: RolloutStatus::Pending,
        }
    }

    /// Produce the next state once propagation has started.
    #[must_use]
    pub fn into_in_progress(mut self) -> Self {
        self.status = RolloutStatus::InProgress;
        self
    }

    /// Produce the completed state with `total` targets all updated.
    #[must_use]
    pub fn into_completed(mut self, total: u64) -> Self {
        self.progress = RolloutProgress { total, updated: total, failed: 0 };
        self.status = RolloutStatus::Completed;
        self
    }

    /// Produce the failed state, recording how many targets succeeded
    /// before the failure.
    #[must_use]
    pub fn into_failed(mut self, progress: RolloutProgress) -> Self {
        self.progress = progress;
        self.status = RolloutStatus::Failed;
        self
    }
}
