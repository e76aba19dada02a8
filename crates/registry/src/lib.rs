//! Policy registry: content-addressed storage, scope/precedence indexing,
//! and lifecycle (register/enable/disable), safe for concurrent use.
//!
//! Writers update a per-id entry plus a precedence secondary index;
//! `listByScope` filters `listActive()` directly rather than maintaining a
//! scope-axis index, since scope-index rebuild on write is cheap at the
//! write rates this kernel targets.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use kernel_core::clock::process_clock;
use kernel_core::error::{ValidationError, ValidationErrors};
use kernel_core::events::{ChangeEvent, ChangeEventKind};
use kernel_core::hash::canonical_hash;
use kernel_core::model::{Precedence, PolicyManifest, PolicyStatus};
use kernel_core::request::EvaluationRequest;
use kernel_core::schema::validate_manifest;
use thiserror::Error;

/// Failure modes of registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Manifest failed structural or schema validation.
    #[error("manifest validation failed: {0:?}")]
    Validation(ValidationErrors),
    /// No entry registered under the given id.
    #[error("policy {0} not found")]
    NotFound(String),
}

/// Stored record for a registered policy: the manifest plus bookkeeping.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The registered manifest.
    pub manifest: PolicyManifest,
    /// Hex SHA-256 of the manifest's canonical serialization.
    pub manifest_hash: String,
    /// Milliseconds since epoch when first registered.
    pub registered_at: u64,
    /// Milliseconds since epoch of the most recent update, if any.
    pub updated_at: Option<u64>,
    /// Current lifecycle status (mutated by enable/disable, independent of
    /// the manifest's own declared `status`).
    pub status: PolicyStatus,
    /// Last error recorded against this entry, if any.
    pub last_error: Option<String>,
}

/// Outcome of a successful `register` call.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    /// Canonical content hash of the stored manifest.
    pub hash: String,
    /// Change event the caller should invalidate caches and publish for.
    pub event: ChangeEvent,
}

/// Histogram of active policy counts by precedence class.
pub type PrecedenceHistogram = HashMap<Precedence, u64>;

/// In-memory, content-addressed store of policy manifests.
#[derive(Default)]
pub struct PolicyRegistry {
    entries: DashMap<String, RegistryEntry>,
    by_precedence: DashMap<Precedence, DashSet<String>>,
    node_id: String,
}

impl PolicyRegistry {
    /// Construct an empty registry identified by `node_id` (used to stamp
    /// `sourceNodeId` on emitted change events).
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self { entries: DashMap::new(), by_precedence: DashMap::new(), node_id: node_id.into() }
    }

    /// Register a manifest, or upsert in place if its id already exists
    /// (preserving `registeredAt`). Emits a `created`/`updated` event on
    /// success; the caller is responsible for cache invalidation and
    /// publishing the event (see the kernel crate's mutation control flow).
    pub fn register(&self, manifest: PolicyManifest) -> Result<RegisterOutcome, RegistryError> {
        validate_manifest(&manifest).map_err(RegistryError::Validation)?;

        let now = process_clock().now_ms();
        let hash = canonical_hash(&manifest);
        let id = manifest.id.clone();
        let precedence = manifest.precedence;

        // The whole read-decide-write span lives under one `entries` entry
        // guard so concurrent `register` calls for the same id linearize:
        // whichever thread wins the shard lock observes the other's write
        // (or lack of one), never a stale snapshot from a separate `get`.
        let (kind, previous_hash, registered_at, old_precedence) = match self.entries.entry(id.clone()) {
            Entry::Occupied(mut occ) => {
                let existing_hash = occ.get().manifest_hash.clone();
                let existing_registered_at = occ.get().registered_at;
                let existing_precedence = occ.get().manifest.precedence;
                tracing::warn!(policy_id = %id, "re-registering existing policy, performing upsert");
                occ.insert(RegistryEntry {
                    manifest: manifest.clone(),
                    manifest_hash: hash.clone(),
                    registered_at: existing_registered_at,
                    updated_at: Some(now),
                    status: manifest.status,
                    last_error: None,
                });
                (ChangeEventKind::Updated, Some(existing_hash), existing_registered_at, Some(existing_precedence))
            }
            Entry::Vacant(vac) => {
                vac.insert(RegistryEntry {
                    manifest: manifest.clone(),
                    manifest_hash: hash.clone(),
                    registered_at: now,
                    updated_at: None,
                    status: manifest.status,
                    last_error: None,
                });
                (ChangeEventKind::Created, None, now, None)
            }
        };

        if let Some(old_precedence) = old_precedence {
            if old_precedence != precedence {
                if let Some(set) = self.by_precedence.get(&old_precedence) {
                    set.remove(&id);
                }
            }
        }
        self.by_precedence.entry(precedence).or_default().insert(id.clone());

        let event = ChangeEvent {
            kind,
            policy_id: id,
            policy: Some(manifest),
            previous_version: previous_hash,
            new_version: Some(hash.clone()),
            timestamp: now,
            source_node_id: self.node_id.clone(),
            metadata: None,
        };

        Ok(RegisterOutcome { hash, event })
    }

    /// Fetch a registry entry by id.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<RegistryEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Every entry whose status is active and whose effectivity window
    /// contains the current time.
    #[must_use]
    pub fn list_active(&self) -> Vec<RegistryEntry> {
        let now = time_now();
        self.entries
            .iter()
            .map(|e| e.clone())
            .filter(|e| e.status == PolicyStatus::Active && e.manifest.is_effective_at(now))
            .collect()
    }

    /// Active entries at precedence class `p`.
    #[must_use]
    pub fn list_by_precedence(&self, p: Precedence) -> Vec<RegistryEntry> {
        self.list_active().into_iter().filter(|e| e.manifest.precedence == p).collect()
    }

    /// Active entries whose scope matches `request` under "empty = any"
    /// wildcard semantics, with roles matched by non-empty intersection.
    #[must_use]
    pub fn list_by_scope(&self, request: &EvaluationRequest) -> Vec<RegistryEntry> {
        self.list_active().into_iter().filter(|e| scope_matches(e, request)).collect()
    }

    /// Disable a policy: sets its runtime status to disabled and emits a
    /// `disabled` event. The caller invalidates caches and publishes.
    pub fn disable(&self, id: &str, reason: Option<String>) -> Result<ChangeEvent, RegistryError> {
        let mut entry = self.entries.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entry.status = PolicyStatus::Disabled;
        let now = time_now_ms();
        entry.updated_at = Some(now);
        let mut metadata = None;
        if let Some(reason) = reason {
            let mut m = serde_json::Map::new();
            m.insert("reason".to_string(), serde_json::Value::String(reason));
            metadata = Some(m);
        }
        Ok(ChangeEvent {
            kind: ChangeEventKind::Disabled,
            policy_id: id.to_string(),
            policy: Some(entry.manifest.clone()),
            previous_version: None,
            new_version: None,
            timestamp: now,
            source_node_id: self.node_id.clone(),
            metadata,
        })
    }

    /// Enable a previously disabled policy; emits an `enabled` event.
    pub fn enable(&self, id: &str) -> Result<ChangeEvent, RegistryError> {
        let mut entry = self.entries.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entry.status = PolicyStatus::Active;
        let now = time_now_ms();
        entry.updated_at = Some(now);
        Ok(ChangeEvent {
            kind: ChangeEventKind::Enabled,
            policy_id: id.to_string(),
            policy: Some(entry.manifest.clone()),
            previous_version: None,
            new_version: None,
            timestamp: now,
            source_node_id: self.node_id.clone(),
            metadata: None,
        })
    }

    /// Remove a policy entirely from the registry and its precedence index.
    /// Emits a `deleted` event with no manifest payload. Reserved for the
    /// update orchestrator, which alone sequences this against cache
    /// invalidation and change-stream publication.
    pub fn remove(&self, id: &str) -> Result<ChangeEvent, RegistryError> {
        let (_, removed) = self.entries.remove(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if let Some(set) = self.by_precedence.get(&removed.manifest.precedence) {
            set.remove(id);
        }
        let now = time_now_ms();
        Ok(ChangeEvent {
            kind: ChangeEventKind::Deleted,
            policy_id: id.to_string(),
            policy: None,
            previous_version: Some(removed.manifest_hash),
            new_version: None,
            timestamp: now,
            source_node_id: self.node_id.clone(),
            metadata: None,
        })
    }

    /// Count of active entries per precedence class.
    #[must_use]
    pub fn count_by_precedence(&self) -> PrecedenceHistogram {
        let mut histogram = PrecedenceHistogram::new();
        for entry in self.list_active() {
            *histogram.entry(entry.manifest.precedence).or_insert(0) += 1;
        }
        histogram
    }

    /// Full reset. Test hook only.
    pub fn clear(&self) {
        self.entries.clear();
        self.by_precedence.clear();
    }
}

fn time_now_ms() -> u64 {
    process_clock().now_ms()
}

fn time_now() -> time::OffsetDateTime {
    let ms = time_now_ms();
    time::OffsetDateTime::from_unix_timestamp((ms / 1000) as i64)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

fn scope_matches(entry: &RegistryEntry, request: &EvaluationRequest) -> bool {
    let scope = &entry.manifest.scope;

    if !scope.orchestras.is_empty() {
        match &request.orchestra {
            Some(o) if scope.orchestras.contains(o) => {}
            _ => return false,
        }
    }
    if !scope.tenants.is_empty() {
        match &request.tenant_id {
            Some(t) if scope.tenants.contains(t) => {}
            _ => return false,
        }
    }
    if !scope.roles.is_empty() {
        if request.roles.is_empty() || scope.roles.is_disjoint(&request.roles) {
            return false;
        }
    }
    if !scope.actions.is_empty() && !scope.actions.contains(&request.action) {
        return false;
    }
    if !scope.resources.is_empty() {
        match &request.resource {
            Some(r) if scope.resources.contains(&r.resource_type) || scope.resources.contains(&r.id) => {}
            _ => return false,
        }
    }
    true
}
