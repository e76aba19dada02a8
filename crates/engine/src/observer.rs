//! In-process observability hooks for the evaluation pipeline: a pluggable
//! observer callback, an in-memory evaluation counter map, and an audit
//! sink. Nothing here reaches out to a network — external backends (tracing
//! spans, OTel counters) plug in by installing an observer or audit sink
//! from the outside, the same way the teacher's rule interpreter let
//! callers install a `PolicyObserver`/`AuditSink` without the engine knowing
//! what backend was on the other end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use kernel_core::model::Precedence;
use kernel_core::request::{EvaluationRequest, EvaluationResult};

/// Callback invoked with every evaluation result, in addition to the
/// built-in metrics/audit bookkeeping. Install with [`set_observer`].
pub trait EvaluationObserver: Send + Sync {
    /// Called once per `evaluate()` call, after the decision is final.
    /// `timed_out` is set only on the deadline-exceeded branch, so a
    /// timeout deny can be told apart from an ordinary policy deny.
    fn on_evaluation(&self, result: &EvaluationResult, orchestra: Option<&str>, timed_out: bool);
}

static OBSERVER: OnceLock<RwLock<Option<Arc<dyn EvaluationObserver>>>> = OnceLock::new();

fn observer_cell() -> &'static RwLock<Option<Arc<dyn EvaluationObserver>>> {
    OBSERVER.get_or_init(|| RwLock::new(None))
}

/// Install (or clear, with `None`) the global evaluation observer.
pub fn set_observer(observer: Option<Arc<dyn EvaluationObserver>>) {
    *observer_cell().write().expect("observer lock poisoned") = observer;
}

/// In-process counters keyed by `result:orchestra:precedence`, mirroring
/// `policy_evaluations_total` without requiring an external metrics
/// backend to be wired up.
#[derive(Default)]
pub struct EngineMetrics {
    counts: Mutex<HashMap<String, u64>>,
    /// Timeout deny counts, keyed by `orchestra:precedence`, kept separate
    /// from `counts` so a timeout deny is never folded into the ordinary
    /// `deny` bucket an unconditional policy denial would land in.
    timeouts: Mutex<HashMap<String, u64>>,
}

impl EngineMetrics {
    fn record(&self, result: &str, orchestra: &str, precedence: &str) {
        let key = format!("{result}:{orchestra}:{precedence}");
        *self.counts.lock().expect("metrics lock poisoned").entry(key).or_insert(0) += 1;
    }

    fn record_timeout(&self, orchestra: &str, precedence: &str) {
        let key = format!("{orchestra}:{precedence}");
        *self.timeouts.lock().expect("timeout metrics lock poisoned").entry(key).or_insert(0) += 1;
    }

    /// Snapshot of all counters recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.lock().expect("metrics lock poisoned").clone()
    }

    /// Snapshot of timeout-deny counters, keyed by `orchestra:precedence`.
    #[must_use]
    pub fn timeout_snapshot(&self) -> HashMap<String, u64> {
        self.timeouts.lock().expect("timeout metrics lock poisoned").clone()
    }
}

static METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Process-wide evaluation metrics counter.
#[must_use]
pub fn policy_metrics() -> &'static EngineMetrics {
    METRICS.get_or_init(EngineMetrics::default)
}

/// Kind of event captured in an [`AuditRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditRecordKind {
    /// Every evaluation, regardless of outcome.
    Evaluation,
    /// An evaluation that denied the request.
    Violation,
    /// An evaluation whose resolver flagged a precedence conflict.
    Conflict,
}

/// One audit trail entry produced by the evaluation pipeline.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// What kind of event this is.
    pub kind: AuditRecordKind,
    /// Caller-supplied trace id, when present.
    pub trace_id: Option<String>,
    /// Action attempted.
    pub action: String,
    /// Id of the policy that decided the outcome, when any did.
    pub policy_id: Option<String>,
    /// Human-readable reason.
    pub reason: String,
    /// Milliseconds since epoch when the record was produced.
    pub timestamp_ms: u64,
}

/// Sink an [`AuditRecord`] is pushed to. Install with [`install_audit_sink`].
pub trait AuditSink: Send + Sync {
    /// Record one audit entry.
    fn record(&self, record: AuditRecord);
}

static AUDIT_SINK: OnceLock<RwLock<Option<Arc<dyn AuditSink>>>> = OnceLock::new();

fn audit_cell() -> &'static RwLock<Option<Arc<dyn AuditSink>>> {
    AUDIT_SINK.get_or_init(|| RwLock::new(None))
}

/// Install (or clear, with `None`) the global audit sink.
pub fn install_audit_sink(sink: Option<Arc<dyn AuditSink>>) {
    *audit_cell().write().expect("audit sink lock poisoned") = sink;
}

fn precedence_label(p: Precedence) -> &'static str {
    match p {
        Precedence::Internal => "internal",
        Precedence::Industry => "industry",
        Precedence::Legal => "legal",
    }
}

/// Increment in-process metrics, push audit records, and invoke the
/// installed observer, if any, for one evaluation result. Called once at
/// the end of every `Engine::evaluate`.
pub(crate) fn notify_observer(result: &EvaluationResult, request: &EvaluationRequest, timed_out: bool) {
    let result_label = if result.allowed { "allow" } else { "deny" };
    let orchestra = request.orchestra.as_deref().unwrap_or("none");
    let precedence_str =
        result.winning_policy.as_ref().map_or("none", |w| precedence_label(w.precedence));

    policy_metrics().record(result_label, orchestra, precedence_str);
    if timed_out {
        policy_metrics().record_timeout(orchestra, precedence_str);
    }

    let now = kernel_core::ids::now_ms();
    let policy_id = result.winning_policy.as_ref().map(|w| w.id.clone());

    if let Some(sink) = audit_cell().read().expect("audit sink lock poisoned").as_ref() {
        sink.record(AuditRecord {
            kind: AuditRecordKind::Evaluation,
            trace_id: request.trace_id.clone(),
            action: request.action.clone(),
            policy_id: policy_id.clone(),
            reason: result.reason.clone(),
            timestamp_ms: now,
        });
        if !result.allowed {
            sink.record(AuditRecord {
                kind: AuditRecordKind::Violation,
                trace_id: request.trace_id.clone(),
                action: request.action.clone(),
                policy_id: policy_id.clone(),
                reason: result.reason.clone(),
                timestamp_ms: now,
            });
        }
        if result.metadata.conflicts_resolved > 0 {
            sink.record(AuditRecord {
                kind: AuditRecordKind::Conflict,
                trace_id: request.trace_id.clone(),
                action: request.action.clone(),
                policy_id,
                reason: result.reason.clone(),
                timestamp_ms: now,
            });
        }
    }

    if let Some(observer) = observer_cell().read().expect("observer lock poisoned").as_ref() {
        observer.on_evaluation(result, request.orchestra.as_deref(), timed_out);
    }

    tracing::debug!(
        result = result_label,
        orchestra,
        precedence = precedence_str,
        policies_checked = result.metadata.policies_checked,
        "policy evaluation completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_core::request::EvaluationMetadata;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    struct RecordingAudit(StdMutex<Vec<AuditRecordKind>>);

    impl AuditSink for RecordingAudit {
        fn record(&self, record: AuditRecord) {
            self.0.lock().unwrap().push(record.kind);
        }
    }

    #[test]
    fn audit_sink_receives_evaluation_and_violation_records() {
        let _guard = TEST_LOCK.lock().unwrap();
        let sink = Arc::new(RecordingAudit(StdMutex::new(Vec::new())));
        install_audit_sink(Some(sink.clone()));

        let request = EvaluationRequest { action: "delete".to_string(), ..Default::default() };
        let result = EvaluationResult {
            allowed: false,
            winning_policy: None,
            evaluated_policies: vec![],
            reason: "denied".to_string(),
            warnings: vec![],
            metadata: EvaluationMetadata::default(),
        };
        notify_observer(&result, &request, false);

        let kinds = sink.0.lock().unwrap().clone();
        assert!(kinds.contains(&AuditRecordKind::Evaluation));
        assert!(kinds.contains(&AuditRecordKind::Violation));

        install_audit_sink(None);
    }

    #[test]
    fn timeout_deny_records_a_dedicated_counter_distinct_from_ordinary_deny() {
        let _guard = TEST_LOCK.lock().unwrap();
        let request = EvaluationRequest {
            action: "delete".to_string(),
            orchestra: Some("db".to_string()),
            ..Default::default()
        };
        let result = EvaluationResult {
            allowed: false,
            winning_policy: None,
            evaluated_policies: vec![],
            reason: "timeout: evaluation exceeded deadline of 0ms".to_string(),
            warnings: vec![],
            metadata: EvaluationMetadata::default(),
        };

        let before = policy_metrics().timeout_snapshot().get("db:none").copied().unwrap_or(0);
        notify_observer(&result, &request, true);
        let after = policy_metrics().timeout_snapshot().get("db:none").copied().unwrap_or(0);
        assert_eq!(after, before + 1);
    }
}
