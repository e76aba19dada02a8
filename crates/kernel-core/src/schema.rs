//! Manifest validation: wire-format schema checking plus structural
//! invariants that the schema alone cannot express (date ordering).

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{ValidationError, ValidationErrors};
use crate::model::PolicyManifest;

static SCHEMA_JSON: &str = include_str!("../schema/policy_manifest.schema.json");

static COMPILED: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: Value = serde_json::from_str(SCHEMA_JSON).expect("invalid manifest schema json");
    JSONSchema::options().with_draft(Draft::Draft7).compile(&schema).expect("compile manifest schema")
});

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid id regex"));
static SEMVER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid semver regex"));

/// True if `id` matches the lowercase `[a-z0-9-]+` id pattern shared by
/// manifests and templates.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Validate a raw wire-format manifest (untyped JSON) against the normative
/// manifest schema. Used at the registry management surface before the
/// body is deserialized into a typed [`PolicyManifest`].
pub fn validate_wire(v: &Value) -> Result<(), ValidationErrors> {
    match COMPILED.validate(v) {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors
            .map(|e| ValidationError::new(e.instance_path.to_string(), e.to_string()))
            .collect()),
    }
}

/// Validate a typed manifest's structural invariants: id pattern, SemVer
/// version, non-empty rules, and effectivity date ordering. Exhaustive
/// rather than fail-fast — every violation is reported in one pass.
pub fn validate_manifest(manifest: &PolicyManifest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if !ID_PATTERN.is_match(&manifest.id) {
        errors.push(ValidationError::new("id", "must match [a-z0-9-]+"));
    }
    if !SEMVER_PATTERN.is_match(&manifest.version) {
        errors.push(ValidationError::new("version", "must be SemVer major.minor.patch"));
    }
    if manifest.rules.is_empty() {
        errors.push(ValidationError::new("rules", "must be non-empty"));
    }
    if let (Some(effective), Some(expiration)) = (manifest.effective_date, manifest.expiration_date)
    {
        if effective >= expiration {
            errors.push(ValidationError::new(
                "effectiveDate",
                "must be strictly before expirationDate",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
