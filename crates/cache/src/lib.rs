//! Decision cache: a deterministic, request-shaped key over the active
//! policy set's evaluation outcome, with TTL expiry and bounded-size
//! eviction by oldest insertion.
//!
//! Generalizes the teacher's token/cost counters — plain atomics guarded by
//! a config threshold — into a `DashMap`-backed memoization layer. Eviction
//! follows the `min_by_key(cached_at)` sweep used by cache implementations
//! elsewhere in the pack rather than a true LRU list, since write volume
//! here is register/disable/enable-driven, not per-lookup.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use kernel_core::ids::now_ms;
use kernel_core::request::{EvaluationRequest, EvaluationResult};
use thiserror::Error;

/// Failure modes of cache configuration.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A config field was out of range.
    #[error("invalid cache config: {0}")]
    InvalidConfig(String),
}

/// Tunables for a [`DecisionCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// How long a cached decision remains valid, in milliseconds.
    pub ttl_ms: u64,
    /// Maximum number of entries held at once; the oldest insertion is
    /// evicted to make room for a new key once this is reached.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 60_000, max_entries: 10_000 }
    }
}

impl CacheConfig {
    fn validate(self) -> Result<(), CacheError> {
        if self.ttl_ms == 0 {
            return Err(CacheError::InvalidConfig("ttl_ms must be non-zero".to_string()));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig("max_entries must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// One memoized decision.
#[derive(Debug, Clone)]
struct CacheEntry {
    decision: EvaluationResult,
    cached_at_ms: u64,
    expires_at_ms: u64,
    /// Invalidation generation this entry was written under; stamped for
    /// diagnostics, not consulted by `get` (an `invalidateAll` clears the
    /// map outright rather than relying on generation comparison).
    #[allow(dead_code)]
    version: u64,
}

/// Point-in-time counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries written.
    pub sets: u64,
    /// Entries evicted to stay within `max_entries`.
    pub evictions: u64,
    /// Explicit invalidations (single-key or full-clear).
    pub invalidations: u64,
    /// Entries currently held.
    pub size: usize,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; `0.0` when there have been no lookups yet.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Deterministic key for a cached decision: tenant, user (or
/// `"anonymous"`), resource type/id, action, and the caller's roles sorted
/// ascending — `EvaluationRequest::roles` is already a `BTreeSet`, so no
/// separate sort step is needed here.
#[must_use]
pub fn cache_key(request: &EvaluationRequest) -> String {
    let tenant = request.tenant_id.as_deref().unwrap_or("");
    let user = request.user_id.as_deref().unwrap_or("anonymous");
    let (resource_type, resource_id) = request
        .resource
        .as_ref()
        .map_or(("", ""), |r| (r.resource_type.as_str(), r.id.as_str()));
    let roles = request.roles.iter().cloned().collect::<Vec<_>>().join(",");
    format!("{tenant}::{user}::{resource_type}::{resource_id}::{}::{roles}", request.action)
}

/// Memoizes evaluation results keyed by [`cache_key`]. Safe for concurrent
/// use; every operation is lock-free at the map level (`DashMap` shards
/// internally).
pub struct DecisionCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    node_id: String,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl DecisionCache {
    /// Construct an empty cache identified by `node_id`.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidConfig`] if `config` has a zero TTL or
    /// zero max entry count.
    pub fn new(node_id: impl Into<String>, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            entries: DashMap::new(),
            config,
            node_id: node_id.into(),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        })
    }

    /// Look up a cached decision for `request`. Lazily evicts the entry if
    /// it has expired, rather than waiting for the background sweeper.
    #[must_use]
    pub fn get(&self, request: &EvaluationRequest) -> Option<EvaluationResult> {
        let key = cache_key(request);
        let now = now_ms();

        if let Some(entry) = self.entries.get(&key) {
            if now < entry.expires_at_ms {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.decision.clone());
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Expired: drop it and count as a miss.
        self.entries.remove(&key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Memoize `decision` for `request`, evicting the oldest entry first if
    /// the cache is at capacity and this key is new.
    pub fn set(&self, request: &EvaluationRequest, decision: EvaluationResult) {
        let key = cache_key(request);
        let now = now_ms();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            CacheEntry {
                decision,
                cached_at_ms: now,
                expires_at_ms: now + self.config.ttl_ms,
                version: self.generation.load(Ordering::Relaxed),
            },
        );
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Invalidate the single entry matching `request`'s key, if any.
    pub fn invalidate(&self, request: &EvaluationRequest) {
        let key = cache_key(request);
        if self.entries.remove(&key).is_some() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Clear every cached entry and bump the invalidation generation. The
    /// update orchestrator calls this before publishing any change event so
    /// no stale decision can outlive a registry mutation.
    pub fn invalidate_all(&self) {
        let cleared = self.entries.len();
        self.entries.clear();
        self.generation.fetch_add(1, Ordering::Relaxed);
        if cleared > 0 {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(node_id = %self.node_id, cleared, "decision cache invalidated");
    }

    /// Snapshot of cache effectiveness counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    /// Remove every entry whose TTL has lapsed as of now. Called
    /// periodically by [`spawn_sweeper`]; `get` also does this lazily, so
    /// correctness never depends on the sweeper running.
    pub fn sweep_expired(&self) {
        let now = now_ms();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now >= e.value().expires_at_ms)
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
        }
    }

    fn evict_oldest(&self) {
        let oldest = self.entries.iter().min_by_key(|e| e.value().cached_at_ms).map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Spawn a background task that calls [`DecisionCache::sweep_expired`] on a
/// fixed cadence. Returns the task handle so the caller can abort it on
/// shutdown; dropping the handle without aborting leaves the task running
/// (tokio's default detached-task behavior).
pub fn spawn_sweeper(
    cache: std::sync::Arc<DecisionCache>,
    cadence: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        loop {
            ticker.tick().await;
            cache.sweep_expired();
        }
    })
}
