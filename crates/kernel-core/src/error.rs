//! Shared error primitives.
//!
//! Each crate in the workspace defines its own `thiserror` enum scoped to
//! its own responsibility (see `registry::RegistryError`,
//! `templates::TemplateError`, `cache::CacheError`); `ValidationError` lives
//! here because manifest and template validation is shared by several
//! crates and must report the same shape everywhere: a field path and a
//! reason, never just a string.

use thiserror::Error;

/// A single structural validation failure, reported with enough context
/// for a caller to point a user at the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. `rules[2].effect`).
    pub field: String,
    /// Human-readable reason the field failed validation.
    pub reason: String,
}

impl ValidationError {
    /// Construct a new validation error.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { field: field.into(), reason: reason.into() }
    }
}

/// A list of validation failures. Validation is exhaustive and structural
/// rather than fail-fast, so callers see every violation in one pass
/// instead of stopping at the first.
pub type ValidationErrors = Vec<ValidationError>;
