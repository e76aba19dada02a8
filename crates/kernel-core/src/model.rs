//! Policy value types: precedence, rules, conditions, scope, and the
//! manifest that ties them together.
//!
//! These are plain data — no registry lookups, no evaluation logic. Keeping
//! them free of behavior is what lets `hash`, `schema`, and every downstream
//! crate share one vocabulary without circular dependencies.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Totally ordered policy precedence class. `LEGAL` dominates `INDUSTRY`
/// dominates `INTERNAL`; derive order follows declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Precedence {
    /// Lowest-ranked class: internal operational policy.
    Internal,
    /// Industry-standard policy, outranks internal.
    Industry,
    /// Legal/regulatory policy, outranks everything else.
    Legal,
}

/// Enforcement mode attached to a manifest. Only `Enforce` can deny; `Warn`
/// and `Monitor` always allow but still produce a full audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Violations are denied.
    Enforce,
    /// Violations are allowed but recorded as warnings.
    Warn,
    /// Violations are allowed and recorded, no warning surfaced.
    Monitor,
}

/// Lifecycle status of a registered policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    /// Eligible to be considered during evaluation (subject to effectivity window).
    Active,
    /// Excluded from evaluation until re-enabled.
    Disabled,
}

/// Outcome a rule produces when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Permit the request.
    Allow,
    /// Block the request.
    Deny,
}

/// Condition comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Value equality.
    Eq,
    /// Value inequality.
    Ne,
    /// Numeric greater-than.
    Gt,
    /// Numeric less-than.
    Lt,
    /// Numeric greater-than-or-equal.
    Gte,
    /// Numeric less-than-or-equal.
    Lte,
    /// Membership in an array value.
    In,
    /// Non-membership in an array value.
    Nin,
    /// Substring (string field) or element-of (array field).
    Contains,
    /// Regex match against a string field.
    Regex,
}

/// A single `(field_path, operator, value)` triple. Rules AND-combine
/// conditions; there is no OR — express alternation as separate rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dot-separated path resolved against the evaluation request.
    pub field_path: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Operand, typed per-operator (array for `in`/`nin`, pattern string for `regex`).
    pub value: Value,
}

impl Condition {
    /// Construct a condition triple.
    pub fn new(field_path: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self { field_path: field_path.into(), operator, value }
    }
}

/// A named, orderable unit of matching logic. A rule matches a request iff
/// every condition in `conditions` holds; an empty `conditions` list always
/// matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Identifier, unique within the owning manifest.
    pub id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Conditions, AND-combined.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Effect produced when this rule matches.
    pub effect: Effect,
}

/// Sparse scope filter. Each axis is a set of strings; an empty set means
/// "matches any" on that axis. A scope with every axis empty is global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Orchestras (action dispatch domains) this policy applies to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub orchestras: BTreeSet<String>,
    /// Tenants this policy applies to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tenants: BTreeSet<String>,
    /// Roles this policy applies to (intersection-non-empty match).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    /// Actions this policy applies to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub actions: BTreeSet<String>,
    /// Resource types/ids this policy applies to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub resources: BTreeSet<String>,
}

impl Scope {
    /// True if every axis is empty (global policy).
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.orchestras.is_empty()
            && self.tenants.is_empty()
            && self.roles.is_empty()
            && self.actions.is_empty()
            && self.resources.is_empty()
    }
}

/// The declarative, hashable representation of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyManifest {
    /// Lowercase `[a-z0-9-]+` identifier, unique in the registry.
    pub id: String,
    /// Display name.
    pub name: String,
    /// SemVer `major.minor.patch` version string.
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Precedence class.
    pub precedence: Precedence,
    /// Author-declared initial lifecycle status.
    pub status: PolicyStatus,
    /// Enforcement mode.
    pub enforcement_mode: EnforcementMode,
    /// Scope filter.
    #[serde(default)]
    pub scope: Scope,
    /// Rules, non-empty, evaluated in declaration order.
    pub rules: Vec<Rule>,
    /// Optional effectivity window start, RFC 3339.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub effective_date: Option<time::OffsetDateTime>,
    /// Optional effectivity window end, RFC 3339.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiration_date: Option<time::OffsetDateTime>,
    /// Free-form metadata, preserved but never interpreted by the kernel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Populated only on manifests produced by template resolution: the
    /// template id this manifest was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<String>,
    /// Populated only on derived manifests: scope/rule fields the override
    /// replaced relative to the template's base.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overridden_properties: Vec<String>,
    /// Populated only on derived manifests: fields the extension appended to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended_properties: Vec<String>,
}

impl PolicyManifest {
    /// True if `status == Active` and `now` falls within the effectivity
    /// window (open on either end when the corresponding date is absent).
    #[must_use]
    pub fn is_effective_at(&self, now: time::OffsetDateTime) -> bool {
        if self.status != PolicyStatus::Active {
            return false;
        }
        if let Some(effective) = self.effective_date {
            if now < effective {
                return false;
            }
        }
        if let Some(expiration) = self.expiration_date {
            if now > expiration {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn manifest(status: PolicyStatus) -> PolicyManifest {
        PolicyManifest {
            id: "p1".to_string(),
            name: "P1".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            precedence: Precedence::Internal,
            status,
            enforcement_mode: EnforcementMode::Enforce,
            scope: Scope::default(),
            rules: vec![],
            effective_date: None,
            expiration_date: None,
            metadata: None,
            inherited_from: None,
            overridden_properties: vec![],
            extended_properties: vec![],
        }
    }

    #[test]
    fn disabled_status_is_never_effective_regardless_of_window() {
        let m = manifest(PolicyStatus::Disabled);
        assert!(!m.is_effective_at(datetime!(2026-01-01 0:00 UTC)));
    }

    #[test]
    fn no_dates_is_effective_at_any_time() {
        let m = manifest(PolicyStatus::Active);
        assert!(m.is_effective_at(datetime!(1970-01-01 0:00 UTC)));
        assert!(m.is_effective_at(datetime!(2999-01-01 0:00 UTC)));
    }

    #[test]
    fn before_effective_date_is_not_effective() {
        // Invariant 8: a policy with effectiveDate > now never appears active.
        let mut m = manifest(PolicyStatus::Active);
        m.effective_date = Some(datetime!(2026-06-01 0:00 UTC));
        assert!(!m.is_effective_at(datetime!(2026-01-01 0:00 UTC)));
        assert!(m.is_effective_at(datetime!(2026-06-01 0:00 UTC)));
        assert!(m.is_effective_at(datetime!(2026-12-01 0:00 UTC)));
    }

    #[test]
    fn after_expiration_date_is_not_effective() {
        // Invariant 8: a policy with expirationDate < now never appears active.
        let mut m = manifest(PolicyStatus::Active);
        m.expiration_date = Some(datetime!(2026-06-01 0:00 UTC));
        assert!(m.is_effective_at(datetime!(2026-01-01 0:00 UTC)));
        assert!(m.is_effective_at(datetime!(2026-06-01 0:00 UTC)));
        assert!(!m.is_effective_at(datetime!(2026-12-01 0:00 UTC)));
    }

    #[test]
    fn within_both_bounds_is_effective() {
        let mut m = manifest(PolicyStatus::Active);
        m.effective_date = Some(datetime!(2026-01-01 0:00 UTC));
        m.expiration_date = Some(datetime!(2026-12-31 0:00 UTC));
        assert!(m.is_effective_at(datetime!(2026-06-15 0:00 UTC)));
        assert!(!m.is_effective_at(datetime!(2025-12-31 0:00 UTC)));
        assert!(!m.is_effective_at(datetime!(2027-01-01 0:00 UTC)));
    }
}

/// A reusable manifest skeleton consumed by inheritance resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Identifier, unique among templates.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form template category (e.g. `"data-access"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Precedence class assigned to manifests derived from this template.
    pub precedence: Precedence,
    /// Base scope inherited by derived manifests absent an override.
    #[serde(default)]
    pub base_scope: Scope,
    /// Base rules inherited by derived manifests absent an override.
    #[serde(default)]
    pub base_rules: Vec<Rule>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}
