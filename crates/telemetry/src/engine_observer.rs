//! OTel-backed [`engine::EvaluationObserver`] implementation: the otel
//! counterpart of the in-process `InMemoryMetricsSink`, instrumented with
//! the same `policy_evaluations_total`/`policy_conflicts_total`/
//! `policy_violations_total` names.

#![allow(clippy::module_name_repetitions)]

use engine::EvaluationObserver;
use kernel_core::request::EvaluationResult;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};

struct Instruments {
    evaluations: Counter<u64>,
    conflicts: Counter<u64>,
    violations: Counter<u64>,
    timeouts: Counter<u64>,
}

static INSTR: OnceCell<Instruments> = OnceCell::new();

fn ensure_instruments() -> &'static Instruments {
    INSTR.get_or_init(|| {
        // Uses the global meter provider; a no-op if `init_otel` was never
        // called, same as the teacher's `OtelPolicyObserver`.
        let meter: Meter = global::meter("kernel.engine");
        Instruments {
            evaluations: meter
                .u64_counter("policy_evaluations_total")
                .with_description("Evaluations by result, orchestra, precedence")
                .init(),
            conflicts: meter
                .u64_counter("policy_conflicts_total")
                .with_description("Precedence ties resolved by deny-wins")
                .init(),
            violations: meter
                .u64_counter("policy_violations_total")
                .with_description("Evaluations that denied the request")
                .init(),
            timeouts: meter
                .u64_counter("policy_evaluation_timeouts_total")
                .with_description("Evaluations denied because the deadline was exceeded")
                .init(),
        }
    })
}

/// OTel-backed observer for evaluation results. Install with
/// `engine::set_observer(Some(Arc::new(EngineOtelObserver)))`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineOtelObserver;

impl EvaluationObserver for EngineOtelObserver {
    fn on_evaluation(&self, result: &EvaluationResult, orchestra: Option<&str>, timed_out: bool) {
        let inst = ensure_instruments();
        let result_str = if result.allowed { "allow" } else { "deny" };
        let orchestra_str = orchestra.unwrap_or("none");
        let precedence_str = result.winning_policy.as_ref().map_or("none", |w| match w.precedence {
            kernel_core::model::Precedence::Internal => "internal",
            kernel_core::model::Precedence::Industry => "industry",
            kernel_core::model::Precedence::Legal => "legal",
        });

        let attrs = [
            KeyValue::new("result", result_str.to_string()),
            KeyValue::new("orchestra", orchestra_str.to_string()),
            KeyValue::new("precedence", precedence_str.to_string()),
        ];
        inst.evaluations.add(1, &attrs);

        if result.metadata.conflicts_resolved > 0 {
            inst.conflicts.add(1, &[KeyValue::new("winning_precedence", precedence_str.to_string())]);
        }
        if !result.allowed {
            inst.violations.add(
                1,
                &[
                    KeyValue::new("orchestra", orchestra_str.to_string()),
                    KeyValue::new("precedence", precedence_str.to_string()),
                ],
            );
        }
        if timed_out {
            inst.timeouts.add(
                1,
                &[
                    KeyValue::new("orchestra", orchestra_str.to_string()),
                    KeyValue::new("precedence", precedence_str.to_string()),
                ],
            );
        }
    }
}

/// Return an observer instance. Prefer a new value over `&'static` for
/// simplicity, mirroring the teacher's `policy_observer::global()`.
#[must_use]
pub fn global() -> EngineOtelObserver {
    let _ = ensure_instruments();
    EngineOtelObserver
}
