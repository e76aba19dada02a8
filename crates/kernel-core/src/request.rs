//! Evaluation request/result types passed between the registry, the engine,
//! and the cache.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Effect, Precedence};

/// Resource an evaluation request targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type (e.g. `"user_data"`).
    #[serde(rename = "type", default)]
    pub resource_type: String,
    /// Resource instance id.
    #[serde(default)]
    pub id: String,
}

/// Request asking the kernel whether a principal may perform an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Action being attempted. Always present.
    pub action: String,
    /// Orchestration domain the action runs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestra: Option<String>,
    /// Tenant the action is performed on behalf of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Principal performing the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Roles held by the principal.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    /// Resource the action targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    /// Free-form context, resolved by condition field paths under `context.*`.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Caller-supplied trace id, echoed in telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl EvaluationRequest {
    /// Render the request as a JSON tree for dotted field-path resolution
    /// (see [`crate::fieldpath`]). Top-level keys mirror the request's own
    /// fields; `context` is merged in as nested `context.*` paths.
    #[must_use]
    pub fn as_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("action".to_string(), Value::String(self.action.clone()));
        if let Some(orchestra) = &self.orchestra {
            root.insert("orchestra".to_string(), Value::String(orchestra.clone()));
        }
        if let Some(tenant_id) = &self.tenant_id {
            root.insert("tenantId".to_string(), Value::String(tenant_id.clone()));
        }
        if let Some(user_id) = &self.user_id {
            root.insert("userId".to_string(), Value::String(user_id.clone()));
        }
        if !self.roles.is_empty() {
            root.insert(
                "roles".to_string(),
                Value::Array(self.roles.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(resource) = &self.resource {
            let mut r = Map::new();
            r.insert("type".to_string(), Value::String(resource.resource_type.clone()));
            r.insert("id".to_string(), Value::String(resource.id.clone()));
            root.insert("resource".to_string(), Value::Object(r));
        }
        root.insert("context".to_string(), Value::Object(self.context.clone()));
        Value::Object(root)
    }
}

/// Record of a single policy's consideration during evaluation, surfaced in
/// `EvaluationResult::evaluated_policies` for audit purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedPolicy {
    /// Policy id considered.
    pub policy_id: String,
    /// Precedence class of the considered policy.
    pub precedence: Precedence,
    /// Whether a rule in this policy matched the request.
    pub matched: bool,
    /// Effect produced, when a rule matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
    /// Human-readable reason (e.g. `"rule <id> matched"`).
    pub reason: String,
}

/// The policy whose effect became the final decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinningPolicy {
    /// Winning policy id.
    pub id: String,
    /// Winning policy's precedence class.
    pub precedence: Precedence,
    /// Winning effect.
    pub effect: Effect,
}

/// Diagnostic counters attached to every evaluation result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetadata {
    /// Wall-clock duration of the evaluation, in milliseconds.
    pub evaluation_time_ms: u64,
    /// Number of candidate policies considered.
    pub policies_checked: u64,
    /// 1 if the resolver reported a conflict, else 0.
    pub conflicts_resolved: u64,
}

/// Outcome of evaluating an [`EvaluationRequest`]. A pure function of the
/// request and the registry snapshot taken at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Whether the action is permitted.
    pub allowed: bool,
    /// The policy that decided the outcome, if any policy matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_policy: Option<WinningPolicy>,
    /// Every candidate policy considered, matched or not.
    #[serde(default)]
    pub evaluated_policies: Vec<EvaluatedPolicy>,
    /// Human-readable explanation of the decision.
    pub reason: String,
    /// Non-fatal warnings (e.g. a precedence conflict record).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Diagnostic counters.
    pub metadata: EvaluationMetadata,
}
