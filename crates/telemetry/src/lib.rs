//! Structured logging plus the pluggable audit/metrics sink interfaces the
//! registry, engine, and kernel emit through. Everything here is additive:
//! none of the sinks are required to make a decision, they only observe
//! decisions already made.
//!
//! JSON logging (`init_json_logging`) and the in-process sinks
//! (`InMemoryMetricsSink`, `InMemoryAuditSink`) are always available.
//! Real OTel export is behind the `otel` feature, which also wires an
//! [`engine::EvaluationObserver`] implementation backed by OTel instruments.

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "otel")]
pub mod engine_observer;

use std::sync::Mutex;

use dashmap::DashMap;
use kernel_core::model::Precedence;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Failure modes of telemetry setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// OTel pipeline construction failed.
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured JSON logging with an env filter. Set `RUST_LOG`,
/// e.g. `"info,engine=debug"`.
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize the OpenTelemetry tracer pipeline (behind the `otel` feature).
/// Does not hook a tracing-subscriber layer; callers that want OTel spans
/// threaded through `tracing` still install their own layer.
#[cfg(feature = "otel")]
pub fn init_otel(service_name: &str) -> Result<(), TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace as sdktrace;
    use opentelemetry_sdk::{runtime, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", service_name.to_owned())]);
    let _tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http())
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otel(e.to_string()))?;
    Ok(())
}

/// Returns whether telemetry has been initialized. Stubbed pending a real
/// readiness signal from the installed sinks.
#[must_use]
pub fn is_initialized() -> bool {
    true
}

fn precedence_label(p: Precedence) -> &'static str {
    match p {
        Precedence::Internal => "internal",
        Precedence::Industry => "industry",
        Precedence::Legal => "legal",
    }
}

/// Metrics a governance kernel emits, named after the seven counters in its
/// component's emitted-metrics list. Implementations may forward these to
/// any backend (in-process counters, OTel, a push gateway); the kernel only
/// depends on this trait, never on a concrete backend.
pub trait MetricsSink: Send + Sync {
    /// `policy_registrations_total{precedence,status}`.
    fn record_registration(&self, precedence: Precedence, status: &str);
    /// `policies_active{precedence}` gauge.
    fn set_active_gauge(&self, precedence: Precedence, count: u64);
    /// `policy_evaluations_total{result,orchestra,precedence}`.
    fn record_evaluation(&self, result: &str, orchestra: &str, precedence: &str);
    /// `policy_evaluation_duration_seconds{result,precedence}` histogram.
    fn observe_evaluation_duration(&self, result: &str, precedence: &str, seconds: f64);
    /// `policies_checked_per_evaluation` histogram.
    fn observe_policies_checked(&self, count: u64);
    /// `policy_conflicts_total{winning_precedence}`.
    fn record_conflict(&self, winning_precedence: Precedence);
    /// `policy_violations_total{orchestra,action,precedence}`.
    fn record_violation(&self, orchestra: &str, action: &str, precedence: Precedence);
}

/// Kind of entry recorded by an [`AuditSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEntryKind {
    /// A policy lifecycle mutation (register/enable/disable/delete).
    Lifecycle,
    /// An evaluation, regardless of outcome.
    Evaluation,
    /// An evaluation that denied the request.
    Violation,
    /// An evaluation whose resolver flagged a precedence conflict.
    Conflict,
}

/// One audit trail entry, the kernel-level counterpart of
/// `engine::AuditRecord` — this one also covers registry mutations, not
/// just evaluations.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// What kind of event this is.
    pub kind: AuditEntryKind,
    /// Policy id the entry concerns, when applicable.
    pub policy_id: Option<String>,
    /// Caller-supplied trace id, when present.
    pub trace_id: Option<String>,
    /// Human-readable detail.
    pub detail: String,
    /// Milliseconds since epoch when the entry was produced.
    pub timestamp_ms: u64,
}

/// Sink an [`AuditEntry`] is pushed to.
pub trait AuditSink: Send + Sync {
    /// Record one audit entry.
    fn record(&self, entry: AuditEntry);
}

/// Counter/gauge/histogram bookkeeping entirely in-process — no network
/// calls. Suitable as the kernel's default sink, and for assertions in
/// tests that don't want to stand up an OTel collector.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    counters: DashMap<String, u64>,
    gauges: DashMap<String, u64>,
    duration_observations_seconds: DashMap<String, Vec<f64>>,
    policies_checked_observations: Mutex<Vec<u64>>,
}

impl InMemoryMetricsSink {
    /// Construct an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of one counter, or 0 if never recorded.
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[&str]) -> u64 {
        self.counters.get(&counter_key(name, labels)).map_or(0, |v| *v)
    }

    /// Current value of one gauge, or 0 if never set.
    #[must_use]
    pub fn gauge(&self, name: &str, labels: &[&str]) -> u64 {
        self.gauges.get(&counter_key(name, labels)).map_or(0, |v| *v)
    }

    fn incr(&self, name: &str, labels: &[&str]) {
        *self.counters.entry(counter_key(name, labels)).or_insert(0) += 1;
    }
}

fn counter_key(name: &str, labels: &[&str]) -> String {
    format!("{name}:{}", labels.join(":"))
}

impl MetricsSink for InMemoryMetricsSink {
    fn record_registration(&self, precedence: Precedence, status: &str) {
        self.incr("policy_registrations_total", &[precedence_label(precedence), status]);
    }

    fn set_active_gauge(&self, precedence: Precedence, count: u64) {
        self.gauges.insert(counter_key("policies_active", &[precedence_label(precedence)]), count);
    }

    fn record_evaluation(&self, result: &str, orchestra: &str, precedence: &str) {
        self.incr("policy_evaluations_total", &[result, orchestra, precedence]);
    }

    fn observe_evaluation_duration(&self, result: &str, precedence: &str, seconds: f64) {
        self.duration_observations_seconds
            .entry(counter_key("policy_evaluation_duration_seconds", &[result, precedence]))
            .or_default()
            .push(seconds);
    }

    fn observe_policies_checked(&self, count: u64) {
        self.policies_checked_observations.lock().expect("lock poisoned").push(count);
    }

    fn record_conflict(&self, winning_precedence: Precedence) {
        self.incr("policy_conflicts_total", &[precedence_label(winning_precedence)]);
    }

    fn record_violation(&self, orchestra: &str, action: &str, precedence: Precedence) {
        self.incr("policy_violations_total", &[orchestra, action, precedence_label(precedence)]);
    }
}

/// In-memory audit trail. Unbounded — production deployments should install
/// a sink that forwards to durable storage instead, or periodically drain
/// this one.
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    /// Construct an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every entry recorded so far.
    pub fn drain(&self) -> Vec<AuditEntry> {
        std::mem::take(&mut self.entries.lock().expect("lock poisoned"))
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    /// True if no entries have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().expect("lock poisoned").push(entry);
    }
}

/// Metrics sink that only logs via `tracing`, for deployments that ship
/// logs but have no metrics backend wired up yet.
#[derive(Default)]
pub struct LoggingMetricsSink;

impl MetricsSink for LoggingMetricsSink {
    fn record_registration(&self, precedence: Precedence, status: &str) {
        tracing::info!(precedence = precedence_label(precedence), status, "policy_registrations_total");
    }

    fn set_active_gauge(&self, precedence: Precedence, count: u64) {
        tracing::info!(precedence = precedence_label(precedence), count, "policies_active");
    }

    fn record_evaluation(&self, result: &str, orchestra: &str, precedence: &str) {
        tracing::info!(result, orchestra, precedence, "policy_evaluations_total");
    }

    fn observe_evaluation_duration(&self, result: &str, precedence: &str, seconds: f64) {
        tracing::info!(result, precedence, seconds, "policy_evaluation_duration_seconds");
    }

    fn observe_policies_checked(&self, count: u64) {
        tracing::info!(count, "policies_checked_per_evaluation");
    }

    fn record_conflict(&self, winning_precedence: Precedence) {
        tracing::info!(precedence = precedence_label(winning_precedence), "policy_conflicts_total");
    }

    fn record_violation(&self, orchestra: &str, action: &str, precedence: Precedence) {
        tracing::warn!(orchestra, action, precedence = precedence_label(precedence), "policy_violations_total");
    }
}

/// Audit sink that only logs via `tracing`.
#[derive(Default)]
pub struct LoggingAuditSink;

impl AuditSink for LoggingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            kind = ?entry.kind,
            policy_id = entry.policy_id.as_deref(),
            trace_id = entry.trace_id.as_deref(),
            detail = %entry.detail,
            "audit entry"
        );
    }
}
