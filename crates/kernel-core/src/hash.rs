//! Deterministic content hashing for policy manifests.
//!
//! `serde_json::Map` is backed by a `BTreeMap` unless the crate's
//! `preserve_order` feature is enabled (it is not, here), so round-tripping
//! a manifest through [`serde_json::Value`] already sorts every object's
//! keys lexicographically at every nesting level. Arrays keep their
//! original order, which is what rule lists require since rule order is
//! semantically significant.

use sha2::{Digest, Sha256};

use crate::model::PolicyManifest;

/// Hex-encoded SHA-256 of `manifest` serialized in canonical form (sorted
/// object keys at every level, arrays in original order). Stable across
/// field reordering and across encoders that preserve the same value.
#[must_use]
pub fn canonical_hash(manifest: &PolicyManifest) -> String {
    let value = serde_json::to_value(manifest).expect("manifest is always representable as JSON");
    let canonical = serde_json::to_string(&value).expect("canonical value always serializes");
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Effect, EnforcementMode, Precedence, PolicyStatus, Rule, Scope};

    fn sample() -> PolicyManifest {
        PolicyManifest {
            id: "sample-policy".to_string(),
            name: "Sample".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            precedence: Precedence::Internal,
            status: PolicyStatus::Active,
            enforcement_mode: EnforcementMode::Enforce,
            scope: Scope::default(),
            rules: vec![Rule {
                id: "r1".to_string(),
                description: String::new(),
                conditions: vec![],
                effect: Effect::Allow,
            }],
            effective_date: None,
            expiration_date: None,
            metadata: None,
            inherited_from: None,
            overridden_properties: vec![],
            extended_properties: vec![],
        }
    }

    #[test]
    fn hash_is_stable_across_clones() {
        let a = sample();
        let b = a.clone();
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn hash_changes_with_content() {
        let a = sample();
        let mut b = sample();
        b.version = "1.0.1".to_string();
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }
}
