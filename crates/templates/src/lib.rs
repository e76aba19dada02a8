//! Template registry and inheritance resolution.
//!
//! A template is a reusable manifest skeleton. `resolve_from_template`
//! merges a template's base scope/rules with a derived policy's overrides
//! and extensions to produce a concrete, registrable [`PolicyManifest`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use kernel_core::error::ValidationErrors;
use kernel_core::model::{EnforcementMode, PolicyManifest, PolicyStatus, Rule, Scope, Template};
use kernel_core::schema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Per-axis scope override. Empty means "not overridden, keep the
/// template's base value for this axis" — the same "empty = wildcard"
/// convention [`Scope`] already uses, read here as "no override supplied".
pub type ScopeOverride = Scope;

/// Overrides a derived policy supplies on top of its template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    /// Scope fields to replace, field-wise, over the template's base scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeOverride>,
    /// Rules to replace the template's base rules with wholesale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    /// `false` derives the policy disabled rather than active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Additive extensions a derived policy supplies alongside its template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extensions {
    /// Rules appended after the (overridden-or-base) rule list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_rules: Option<Vec<Rule>>,
    /// Metadata entries shallow-merged on top of the template's, winning on
    /// key collision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// A request to derive a concrete policy from a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedPolicySpec {
    /// Template to derive from.
    pub template_id: String,
    /// Replacing overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Overrides>,
    /// Additive extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Extensions>,
}

/// Failure modes of template registration, lookup, and removal.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// No template registered under the given id.
    #[error("template {0} not found")]
    NotFound(String),
    /// Template or derivation input failed structural validation.
    #[error("template validation failed: {0:?}")]
    Validation(ValidationErrors),
    /// `remove` was called on a template with outstanding derived policies.
    #[error("template {template_id} has {derived_count} derived policies and cannot be removed")]
    RemovalBlocked {
        /// Template id removal was attempted on.
        template_id: String,
        /// Number of policies still derived from it.
        derived_count: usize,
    },
}

/// In-memory registry of templates plus usage tracking for the removal
/// safety invariant (a template cannot be removed while policies are
/// derived from it).
#[derive(Default)]
pub struct TemplateRegistry {
    templates: DashMap<String, Template>,
    usage_counts: DashMap<String, AtomicU64>,
    derived_ids: DashMap<String, Vec<String>>,
}

impl TemplateRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or upsert) a template. Re-registering an existing id logs
    /// a warning and replaces its content; usage tracking is untouched.
    pub fn register(&self, template: Template) -> Result<(), TemplateError> {
        if !schema::is_valid_id(&template.id) {
            return Err(TemplateError::Validation(vec![kernel_core::error::ValidationError::new(
                "id",
                "must match [a-z0-9-]+",
            )]));
        }
        if self.templates.contains_key(&template.id) {
            tracing::warn!(template_id = %template.id, "re-registering existing template");
        }
        self.usage_counts.entry(template.id.clone()).or_insert_with(|| AtomicU64::new(0));
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Fetch a template by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Template> {
        self.templates.get(id).map(|t| t.clone())
    }

    /// Number of policies ever derived from `id`.
    #[must_use]
    pub fn usage_count(&self, id: &str) -> u64 {
        self.usage_counts.get(id).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Ids of policies currently derived from `id`.
    #[must_use]
    pub fn derived_policy_ids(&self, id: &str) -> Vec<String> {
        self.derived_ids.get(id).map(|v| v.clone()).unwrap_or_default()
    }

    /// Remove a template. Fails iff it still has derived policies
    /// (invariant 9: `removeTemplate(id)` fails iff `derivedPolicies.len() > 0`).
    pub fn remove(&self, id: &str) -> Result<(), TemplateError> {
        let derived_count = self.derived_policy_ids(id).len();
        if derived_count > 0 {
            return Err(TemplateError::RemovalBlocked { template_id: id.to_string(), derived_count });
        }
        if self.templates.remove(id).is_none() {
            return Err(TemplateError::NotFound(id.to_string()));
        }
        self.usage_counts.remove(id);
        self.derived_ids.remove(id);
        Ok(())
    }

    /// Derive a concrete, registrable manifest from a template plus
    /// overrides/extensions.
    ///
    /// # Errors
    /// [`TemplateError::NotFound`] if `spec.template_id` is unregistered.
    pub fn resolve_from_template(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        spec: &DerivedPolicySpec,
    ) -> Result<PolicyManifest, TemplateError> {
        let template =
            self.get(&spec.template_id).ok_or_else(|| TemplateError::NotFound(spec.template_id.clone()))?;

        let id = id.into();
        self.track_derivation(&spec.template_id, &id);

        let mut overridden_properties = Vec::new();
        let mut extended_properties = Vec::new();

        let scope = match spec.overrides.as_ref().and_then(|o| o.scope.as_ref()) {
            Some(over) => merge_scope(&template.base_scope, over, &mut overridden_properties),
            None => template.base_scope.clone(),
        };

        let rules = match spec.overrides.as_ref().and_then(|o| o.rules.as_ref()) {
            Some(replacement) if !replacement.is_empty() => {
                overridden_properties.push("rules".to_string());
                replacement.clone()
            }
            _ => template.base_rules.clone(),
        };
        let mut rules = rules;
        if let Some(additional) = spec.extensions.as_ref().and_then(|e| e.additional_rules.as_ref()) {
            if !additional.is_empty() {
                extended_properties.push("rules".to_string());
                rules.extend(additional.iter().cloned());
            }
        }

        let mut metadata = template.metadata.clone().unwrap_or_default();
        if let Some(extension_metadata) = spec.extensions.as_ref().and_then(|e| e.metadata.as_ref()) {
            if !extension_metadata.is_empty() {
                extended_properties.push("metadata".to_string());
                for (k, v) in extension_metadata {
                    metadata.insert(k.clone(), v.clone());
                }
            }
        }

        let enabled = spec.overrides.as_ref().and_then(|o| o.enabled).unwrap_or(true);
        if spec.overrides.as_ref().and_then(|o| o.enabled).is_some() {
            overridden_properties.push("enabled".to_string());
        }

        Ok(PolicyManifest {
            id,
            name: name.into(),
            version: version.into(),
            description: String::new(),
            precedence: template.precedence,
            status: if enabled { PolicyStatus::Active } else { PolicyStatus::Disabled },
            enforcement_mode: EnforcementMode::Enforce,
            scope,
            rules,
            effective_date: None,
            expiration_date: None,
            metadata: if metadata.is_empty() { None } else { Some(metadata) },
            inherited_from: Some(spec.template_id.clone()),
            overridden_properties,
            extended_properties,
        })
    }

    fn track_derivation(&self, template_id: &str, derived_id: &str) {
        self.usage_counts
            .entry(template_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        let mut entry = self.derived_ids.entry(template_id.to_string()).or_default();
        if !entry.contains(&derived_id.to_string()) {
            entry.push(derived_id.to_string());
        }
    }
}

fn merge_scope(base: &Scope, over: &Scope, overridden_properties: &mut Vec<String>) -> Scope {
    let mut merged = base.clone();
    if !over.orchestras.is_empty() {
        merged.orchestras = over.orchestras.clone();
        overridden_properties.push("scope.orchestras".to_string());
    }
    if !over.tenants.is_empty() {
        merged.tenants = over.tenants.clone();
        overridden_properties.push("scope.tenants".to_string());
    }
    if !over.roles.is_empty() {
        merged.roles = over.roles.clone();
        overridden_properties.push("scope.roles".to_string());
    }
    if !over.actions.is_empty() {
        merged.actions = over.actions.clone();
        overridden_properties.push("scope.actions".to_string());
    }
    if !over.resources.is_empty() {
        merged.resources = over.resources.clone();
        overridden_properties.push("scope.resources".to_string());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_core::model::{Effect, Precedence};

    fn base_template() -> Template {
        Template {
            id: "data-access-base".to_string(),
            name: "Data access base".to_string(),
            kind: "data-access".to_string(),
            precedence: Precedence::Industry,
            base_scope: Scope { actions: ["read".to_string()].into(), ..Scope::default() },
            base_rules: vec![Rule {
                id: "base-allow".to_string(),
                description: String::new(),
                conditions: vec![],
                effect: Effect::Allow,
            }],
            metadata: None,
        }
    }

    #[test]
    fn not_found_when_template_missing() {
        let reg = TemplateRegistry::new();
        let spec = DerivedPolicySpec { template_id: "ghost".to_string(), overrides: None, extensions: None };
        assert!(matches!(
            reg.resolve_from_template("p1", "P1", "1.0.0", &spec),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn removal_blocked_while_derived_policies_exist() {
        let reg = TemplateRegistry::new();
        reg.register(base_template()).unwrap();
        let spec = DerivedPolicySpec {
            template_id: "data-access-base".to_string(),
            overrides: None,
            extensions: None,
        };
        reg.resolve_from_template("p1", "P1", "1.0.0", &spec).unwrap();
        assert!(matches!(
            reg.remove("data-access-base"),
            Err(TemplateError::RemovalBlocked { derived_count: 1, .. })
        ));
    }

    #[test]
    fn rules_length_matches_inheritance_invariant() {
        // Invariant 6: resolved rules.len == (overrides.rules ?? base.rules).len
        //              + (extensions.additionalRules ?? []).len
        let reg = TemplateRegistry::new();
        reg.register(base_template()).unwrap();
        let spec = DerivedPolicySpec {
            template_id: "data-access-base".to_string(),
            overrides: None,
            extensions: Some(Extensions {
                additional_rules: Some(vec![Rule {
                    id: "extra-deny".to_string(),
                    description: String::new(),
                    conditions: vec![],
                    effect: Effect::Deny,
                }]),
                metadata: None,
            }),
        };
        let resolved = reg.resolve_from_template("p1", "P1", "1.0.0", &spec).unwrap();
        assert_eq!(resolved.rules.len(), 2);
        assert_eq!(resolved.extended_properties, vec!["rules".to_string()]);
    }

    #[test]
    fn override_rules_replace_base_rather_than_append() {
        let reg = TemplateRegistry::new();
        reg.register(base_template()).unwrap();
        let replacement = vec![Rule {
            id: "override-deny".to_string(),
            description: String::new(),
            conditions: vec![],
            effect: Effect::Deny,
        }];
        let spec = DerivedPolicySpec {
            template_id: "data-access-base".to_string(),
            overrides: Some(Overrides { scope: None, rules: Some(replacement), enabled: None }),
            extensions: None,
        };
        let resolved = reg.resolve_from_template("p1", "P1", "1.0.0", &spec).unwrap();
        assert_eq!(resolved.rules.len(), 1);
        assert_eq!(resolved.rules[0].id, "override-deny");
        assert!(resolved.overridden_properties.contains(&"rules".to_string()));
    }

    #[test]
    fn usage_count_tracks_every_derivation() {
        let reg = TemplateRegistry::new();
        reg.register(base_template()).unwrap();
        let spec = DerivedPolicySpec {
            template_id: "data-access-base".to_string(),
            overrides: None,
            extensions: None,
        };
        reg.resolve_from_template("p1", "P1", "1.0.0", &spec).unwrap();
        reg.resolve_from_template("p2", "P2", "1.0.0", &spec).unwrap();
        assert_eq!(reg.usage_count("data-access-base"), 2);
        assert_eq!(reg.derived_policy_ids("data-access-base").len(), 2);
    }
}
