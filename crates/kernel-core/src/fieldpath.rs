//! Dotted field-path resolution against a JSON-shaped request tree.
//!
//! Replaces the dynamic field dispatch patterns seen in peripheral fixtures
//! (bracket/dot mixed accessors, reflection) with one small, fail-closed
//! traversal: a missing path or an attempt to step through a non-object
//! yields `None` rather than panicking or guessing.

use serde_json::Value;

/// Resolve `field_path` (dot-separated, e.g. `"context.userConsent"`)
/// against `root`. Returns `None` if any segment is missing or if a
/// non-terminal segment does not resolve to an object.
#[must_use]
pub fn resolve<'a>(root: &'a Value, field_path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in field_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
