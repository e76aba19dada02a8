//! Canonical hash stability across key reordering and field cloning.

use kernel_core::hash::canonical_hash;
use kernel_core::model::PolicyManifest;
use proptest::prelude::*;
use serde_json::json;

fn manifest_json(version: &str) -> serde_json::Value {
    json!({
        "id": "db-delete-guard",
        "name": "DB delete guard",
        "version": version,
        "description": "deny unconfirmed deletes",
        "precedence": "LEGAL",
        "status": "active",
        "enforcementMode": "enforce",
        "scope": { "orchestras": ["db"], "actions": ["delete"] },
        "rules": [
            {
                "id": "r1",
                "description": "",
                "conditions": [
                    { "fieldPath": "action", "operator": "eq", "value": "delete" },
                    { "fieldPath": "context.confirmed", "operator": "ne", "value": true }
                ],
                "effect": "deny"
            }
        ]
    })
}

fn reordered_manifest_json(version: &str) -> serde_json::Value {
    json!({
        "status": "active",
        "rules": [
            {
                "effect": "deny",
                "conditions": [
                    { "fieldPath": "action", "value": "delete", "operator": "eq" },
                    { "value": true, "fieldPath": "context.confirmed", "operator": "ne" }
                ],
                "id": "r1",
                "description": ""
            }
        ],
        "enforcementMode": "enforce",
        "name": "DB delete guard",
        "scope": { "actions": ["delete"], "orchestras": ["db"] },
        "version": version,
        "precedence": "LEGAL",
        "id": "db-delete-guard",
        "description": "deny unconfirmed deletes"
    })
}

proptest! {
    #[test]
    fn hash_is_invariant_under_key_reorder(patch in "[0-9]{1,3}") {
        let version = format!("1.0.{patch}");
        let a: PolicyManifest = serde_json::from_value(manifest_json(&version)).unwrap();
        let b: PolicyManifest = serde_json::from_value(reordered_manifest_json(&version)).unwrap();
        prop_assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn hash_changes_when_version_changes(a_patch in "[0-9]{1,3}", b_patch in "[0-9]{1,3}") {
        prop_assume!(a_patch != b_patch);
        let a: PolicyManifest =
            serde_json::from_value(manifest_json(&format!("1.0.{a_patch}"))).unwrap();
        let b: PolicyManifest =
            serde_json::from_value(manifest_json(&format!("1.0.{b_patch}"))).unwrap();
        prop_assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }
}
