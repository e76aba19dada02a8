//! Governance kernel composition root.
//!
//! `GovernanceKernel` is the single value a host owns and passes through
//! explicitly (Design Notes: "express as a single governance kernel value
//! owned by the host, passed explicitly") — it wires the registry, the
//! evaluation engine, the decision cache, the template registry, the
//! change stream, and the telemetry sinks together, and owns the mutation
//! control flow every lifecycle operation follows: mutate the registry,
//! then invalidate the cache, then publish the change event, then emit
//! telemetry/audit. That ordering is the cache-consistency invariant: a
//! cache miss that races a mutation always recomputes against the
//! already-mutated registry.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use cache::{CacheConfig, CacheError, DecisionCache};
use change_stream::{ChangeStream, Invalidator, PushService, UpdateOrchestrator};
use engine::Engine;
use kernel_core::events::{ChangeEvent, ChangeEventKind};
use kernel_core::ids::now_ms;
use kernel_core::model::PolicyManifest;
use kernel_core::request::{EvaluationRequest, EvaluationResult};
use registry::{PolicyRegistry, RegisterOutcome, RegistryEntry, RegistryError};
use telemetry::{AuditEntry, AuditEntryKind, AuditSink, InMemoryAuditSink, InMemoryMetricsSink, MetricsSink};
use templates::{DerivedPolicySpec, TemplateError, TemplateRegistry};
use tracing::instrument;

/// Failure modes surfaced across the kernel's public API.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Registry mutation or lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Template lookup, registration, or derivation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Cache construction failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Tunables for a [`GovernanceKernel`]. Defaults follow the Open Question
/// decisions recorded for this workspace.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Forwarded to [`Engine::with_deadline_ms`].
    pub evaluation_deadline_ms: u64,
    /// Decision cache entry lifetime.
    pub cache_ttl_ms: u64,
    /// Decision cache bound; oldest insertion is evicted past this.
    pub cache_max_entries: usize,
    /// Cadence of the background cache sweeper.
    pub cache_sweep_cadence: Duration,
    /// Push client heartbeat interval; a client is disconnected after
    /// missing `2 * heartbeat_interval_ms`.
    pub heartbeat_interval_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            evaluation_deadline_ms: engine::DEFAULT_EVALUATION_DEADLINE_MS,
            cache_ttl_ms: 60_000,
            cache_max_entries: 10_000,
            cache_sweep_cadence: Duration::from_secs(60),
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Satisfies `change_stream::Invalidator` over the decision cache, keeping
/// `change-stream` free of a direct dependency on `cache`.
struct CacheInvalidator(Arc<DecisionCache>);

impl Invalidator for CacheInvalidator {
    fn invalidate_all(&self) {
        self.0.invalidate_all();
    }
}

/// The composed governance kernel: every crate in this workspace wired
/// together behind one owned value.
pub struct GovernanceKernel {
    registry: Arc<PolicyRegistry>,
    engine: Engine,
    cache: Arc<DecisionCache>,
    templates: Arc<TemplateRegistry>,
    stream: Arc<ChangeStream>,
    orchestrator: UpdateOrchestrator,
    push: Option<Arc<PushService>>,
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<dyn AuditSink>,
    config: KernelConfig,
    node_id: String,
}

impl GovernanceKernel {
    /// Evaluate `request`, consulting the decision cache first. A miss
    /// evaluates against the live registry and memoizes the result.
    #[instrument(skip_all, fields(action = %request.action))]
    pub fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResult {
        if let Some(cached) = self.cache.get(request) {
            self.record_evaluation_telemetry(&cached, request, true);
            return cached;
        }

        let result = self.engine.evaluate(request);
        self.cache.set(request, result.clone());
        self.record_evaluation_telemetry(&result, request, false);
        result
    }

    /// Convenience wrapper around [`Self::evaluate`] returning just the
    /// allow/deny bit.
    #[must_use]
    pub fn is_allowed(&self, request: &EvaluationRequest) -> bool {
        self.evaluate(request).allowed
    }

    fn record_evaluation_telemetry(&self, result: &EvaluationResult, request: &EvaluationRequest, from_cache: bool) {
        let result_str = if result.allowed { "allow" } else { "deny" };
        let orchestra_str = request.orchestra.as_deref().unwrap_or("none");
        let precedence_str = result.winning_policy.as_ref().map_or("none", |w| match w.precedence {
            kernel_core::model::Precedence::Internal => "internal",
            kernel_core::model::Precedence::Industry => "industry",
            kernel_core::model::Precedence::Legal => "legal",
        });

        self.metrics.record_evaluation(result_str, orchestra_str, precedence_str);
        self.metrics.observe_evaluation_duration(
            result_str,
            precedence_str,
            f64::from(u32::try_from(result.metadata.evaluation_time_ms).unwrap_or(u32::MAX)) / 1000.0,
        );
        self.metrics.observe_policies_checked(result.metadata.policies_checked);
        if result.metadata.conflicts_resolved > 0 {
            if let Some(winner) = &result.winning_policy {
                self.metrics.record_conflict(winner.precedence);
            }
        }
        if !result.allowed {
            if let Some(winner) = &result.winning_policy {
                self.metrics.record_violation(orchestra_str, &request.action, winner.precedence);
            }
        }

        self.audit.record(AuditEntry {
            kind: AuditEntryKind::Evaluation,
            policy_id: result.winning_policy.as_ref().map(|w| w.id.clone()),
            trace_id: request.trace_id.clone(),
            detail: format!(
                "{} ({}{})",
                result.reason,
                if from_cache { "cache hit" } else { "evaluated" },
                if result.metadata.conflicts_resolved > 0 { ", conflict" } else { "" }
            ),
            timestamp_ms: now_ms(),
        });

        self.publish_evaluation_events(result);
    }

    /// Publish the `evaluated`/`violated`/`conflict_resolved` topics on the
    /// change stream for one evaluation result. Distinct from the mutation
    /// control flow in [`Self::apply_mutation`]: these carry no manifest
    /// payload and never trigger cache invalidation, they just make the
    /// three evaluation-outcome topics spec.md §6 names observable to
    /// change-stream subscribers the same way lifecycle events are.
    fn publish_evaluation_events(&self, result: &EvaluationResult) {
        let policy_id = result.winning_policy.as_ref().map_or_else(String::new, |w| w.id.clone());
        let timestamp = now_ms();
        let base = |kind: ChangeEventKind| ChangeEvent {
            kind,
            policy_id: policy_id.clone(),
            policy: None,
            previous_version: None,
            new_version: None,
            timestamp,
            source_node_id: self.node_id.clone(),
            metadata: None,
        };

        self.stream.publish(&base(ChangeEventKind::Evaluated));
        if !result.allowed {
            self.stream.publish(&base(ChangeEventKind::Violated));
        }
        if result.metadata.conflicts_resolved > 0 {
            self.stream.publish(&base(ChangeEventKind::ConflictResolved));
        }
    }

    /// Register (or upsert) a manifest. Mutates the registry, invalidates
    /// the decision cache, publishes the resulting change event, then
    /// emits telemetry/audit for the mutation.
    #[instrument(skip_all, fields(policy_id = %manifest.id))]
    pub fn register(&self, manifest: PolicyManifest) -> Result<RegisterOutcome, KernelError> {
        let precedence = manifest.precedence;
        let outcome = self.registry.register(manifest)?;
        self.apply_mutation(outcome.event.clone());
        self.metrics.record_registration(precedence, "active");
        self.refresh_active_gauge();
        self.record_lifecycle_audit(&outcome.event, "registered");
        Ok(outcome)
    }

    /// Derive a manifest from a registered template and register it.
    pub fn register_from_template(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        spec: &DerivedPolicySpec,
    ) -> Result<RegisterOutcome, KernelError> {
        let manifest = self.templates.resolve_from_template(id, name, version, spec)?;
        self.register(manifest)
    }

    /// Disable a policy: marks it inactive, invalidates the cache, and
    /// publishes a `disabled` event.
    pub fn disable(&self, id: &str, reason: Option<String>) -> Result<ChangeEvent, KernelError> {
        let event = self.registry.disable(id, reason)?;
        self.apply_mutation(event.clone());
        self.refresh_active_gauge();
        self.record_lifecycle_audit(&event, "disabled");
        Ok(event)
    }

    /// Re-enable a previously disabled policy.
    pub fn enable(&self, id: &str) -> Result<ChangeEvent, KernelError> {
        let event = self.registry.enable(id)?;
        self.apply_mutation(event.clone());
        self.refresh_active_gauge();
        self.record_lifecycle_audit(&event, "enabled");
        Ok(event)
    }

    /// Permanently remove a policy from the registry.
    pub fn delete(&self, id: &str) -> Result<ChangeEvent, KernelError> {
        let event = self.registry.remove(id)?;
        self.apply_mutation(event.clone());
        self.refresh_active_gauge();
        self.record_lifecycle_audit(&event, "deleted");
        Ok(event)
    }

    fn apply_mutation(&self, event: ChangeEvent) {
        self.orchestrator.apply_immediate(event);
    }

    fn refresh_active_gauge(&self) {
        for (precedence, count) in self.registry.count_by_precedence() {
            self.metrics.set_active_gauge(precedence, count);
        }
    }

    fn record_lifecycle_audit(&self, event: &ChangeEvent, verb: &str) {
        self.audit.record(AuditEntry {
            kind: AuditEntryKind::Lifecycle,
            policy_id: Some(event.policy_id.clone()),
            trace_id: None,
            detail: format!("policy {} {verb}", event.policy_id),
            timestamp_ms: event.timestamp,
        });
    }

    /// Fetch a registry entry by id.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<RegistryEntry> {
        self.registry.get_by_id(id)
    }

    /// Every active, currently-effective entry.
    #[must_use]
    pub fn list_active(&self) -> Vec<RegistryEntry> {
        self.registry.list_active()
    }

    /// Active entries at precedence class `p`.
    #[must_use]
    pub fn list_by_precedence(&self, p: kernel_core::model::Precedence) -> Vec<RegistryEntry> {
        self.registry.list_by_precedence(p)
    }

    /// Active entries whose scope matches `request`.
    #[must_use]
    pub fn list_by_scope(&self, request: &EvaluationRequest) -> Vec<RegistryEntry> {
        self.registry.list_by_scope(request)
    }

    /// Count of active entries per precedence class.
    #[must_use]
    pub fn count_by_precedence(&self) -> registry::PrecedenceHistogram {
        self.registry.count_by_precedence()
    }

    /// Snapshot of decision cache effectiveness.
    #[must_use]
    pub fn cache_stats(&self) -> cache::CacheStats {
        self.cache.stats()
    }

    /// The template registry backing [`Self::register_from_template`].
    #[must_use]
    pub fn templates(&self) -> &TemplateRegistry {
        self.templates.as_ref()
    }

    /// The change stream, for callers that want to subscribe directly
    /// (e.g. to register a [`PushService`] after construction).
    #[must_use]
    pub fn change_stream(&self) -> &Arc<ChangeStream> {
        &self.stream
    }

    /// Current rollout state tracked for `policy_id`, if any.
    #[must_use]
    pub fn rollout_status(&self, policy_id: &str) -> Option<kernel_core::events::RolloutState> {
        self.orchestrator.rollout_status(policy_id)
    }

    /// Spawn the background cache sweeper and, if a push service was
    /// configured, its heartbeat watchdog. Requires a running tokio
    /// runtime; call from inside one (e.g. `#[tokio::main]`).
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![cache::spawn_sweeper(self.cache.clone(), self.config.cache_sweep_cadence)];
        if let Some(push) = &self.push {
            handles.push(change_stream::spawn_heartbeat_watchdog(
                push.clone(),
                self.config.heartbeat_interval_ms,
                self.config.cache_sweep_cadence,
            ));
        }
        handles
    }
}

/// Builder for [`GovernanceKernel`], mirroring the corpus's builder-struct
/// convention for multi-component composition roots.
pub struct GovernanceKernelBuilder {
    node_id: String,
    registry: Option<Arc<PolicyRegistry>>,
    templates: Option<Arc<TemplateRegistry>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    audit: Option<Arc<dyn AuditSink>>,
    push: Option<Arc<PushService>>,
    config: KernelConfig,
}

impl GovernanceKernelBuilder {
    /// Start building a kernel identified by `node_id` (stamped on change
    /// events produced by the registry).
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            registry: None,
            templates: None,
            metrics: None,
            audit: None,
            push: None,
            config: KernelConfig::default(),
        }
    }

    /// Supply a pre-populated registry instead of an empty one.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<PolicyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Supply a pre-populated template registry.
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<TemplateRegistry>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Override the default in-memory metrics sink.
    #[must_use]
    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the default in-memory audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach a push service as a change-stream subscriber.
    #[must_use]
    pub fn with_push_service(mut self, push: Arc<PushService>) -> Self {
        self.push = Some(push);
        self
    }

    /// Override the default tunables.
    #[must_use]
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Construct the kernel.
    ///
    /// # Errors
    /// [`KernelError::Cache`] if the configured cache TTL or max entry
    /// count is zero.
    pub fn build(self) -> Result<GovernanceKernel, KernelError> {
        let registry = self.registry.unwrap_or_else(|| Arc::new(PolicyRegistry::new(self.node_id.clone())));
        let templates = self.templates.unwrap_or_else(|| Arc::new(TemplateRegistry::new()));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(InMemoryMetricsSink::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(InMemoryAuditSink::new()));

        let cache = Arc::new(DecisionCache::new(
            self.node_id.clone(),
            CacheConfig { ttl_ms: self.config.cache_ttl_ms, max_entries: self.config.cache_max_entries },
        )?);
        let stream = Arc::new(ChangeStream::new());
        if let Some(push) = &self.push {
            stream.subscribe(push.clone());
        }
        let invalidator: Arc<dyn Invalidator> = Arc::new(CacheInvalidator(cache.clone()));
        let orchestrator = UpdateOrchestrator::new(stream.clone(), invalidator);
        let engine = Engine::new(registry.clone()).with_deadline_ms(self.config.evaluation_deadline_ms);

        Ok(GovernanceKernel {
            registry,
            engine,
            cache,
            templates,
            stream,
            orchestrator,
            push: self.push,
            metrics,
            audit,
            config: self.config,
            node_id: self.node_id,
        })
    }
}
