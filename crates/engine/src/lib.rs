//! Evaluation engine: scope narrowing, per-policy rule matching, precedence
//! resolution, and the telemetry/audit hooks that accompany every decision.
//!
//! Generalizes the teacher's pre-start/pre-submit rule interpreter — PII
//! redaction, a tool allowlist, a priority/most-restrictive/first-match rule
//! scan — into condition-based manifest evaluation against an arbitrary
//! evaluation request. The three-stage shape survives: narrow the candidate
//! set, scan each candidate's rules in order, resolve ties by a fixed
//! precedence rule.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod condition;
mod observer;

pub use condition::eval;
pub use observer::{
    install_audit_sink, policy_metrics, set_observer, AuditRecord, AuditRecordKind, AuditSink,
    EngineMetrics, EvaluationObserver,
};

use std::sync::Arc;
use std::time::Instant;

use kernel_core::model::{Effect, EnforcementMode, Rule};
use kernel_core::request::{
    EvaluatedPolicy, EvaluationMetadata, EvaluationRequest, EvaluationResult, WinningPolicy,
};
use precedence::{resolve, Matched};
use registry::PolicyRegistry;
use serde_json::Value;

/// Default evaluation deadline in milliseconds, used unless a caller
/// overrides it with [`Engine::with_deadline_ms`].
pub const DEFAULT_EVALUATION_DEADLINE_MS: u64 = 100;

/// Evaluates requests against the active, in-scope policy set held by a
/// [`PolicyRegistry`]. Holds no mutable state of its own; every call is a
/// pure function of the request and the registry snapshot taken during it.
pub struct Engine {
    registry: Arc<PolicyRegistry>,
    deadline_ms: u64,
}

impl Engine {
    /// Build an engine over `registry` with the default evaluation deadline.
    #[must_use]
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry, deadline_ms: DEFAULT_EVALUATION_DEADLINE_MS }
    }

    /// Override the evaluation deadline, in milliseconds.
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Evaluate `request` against the active, in-scope policy set.
    ///
    /// 1. Narrow to policies whose scope matches the request (the registry
    ///    does the filtering).
    /// 2. For each candidate, scan its rules in declaration order; the
    ///    first rule whose conditions all hold decides that policy's vote.
    ///    `warn`/`monitor` enforcement modes never contribute a `deny`.
    /// 3. If nothing matched, default-allow.
    /// 4. Otherwise resolve the matched set by precedence (deny wins ties).
    /// 5. Stamp elapsed time; a pipeline that overran its deadline is
    ///    deny-by-default regardless of what it computed.
    /// 6. Notify the installed observer/audit sink/in-process metrics.
    #[must_use]
    pub fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResult {
        let start = Instant::now();
        let request_value = request.as_value();

        let candidates = self.registry.list_by_scope(request);
        let policies_checked = candidates.len() as u64;

        let mut evaluated_policies = Vec::with_capacity(candidates.len());
        let mut matched: Vec<Matched> = Vec::new();
        let mut warnings = Vec::new();

        for entry in &candidates {
            let manifest = &entry.manifest;
            let first_match = first_matching_rule(&manifest.rules, &request_value, &mut warnings);

            match first_match {
                Some((rule, reason)) => {
                    evaluated_policies.push(EvaluatedPolicy {
                        policy_id: manifest.id.clone(),
                        precedence: manifest.precedence,
                        matched: true,
                        effect: Some(rule.effect),
                        reason: reason.clone(),
                    });

                    let effective_effect = match manifest.enforcement_mode {
                        EnforcementMode::Enforce => rule.effect,
                        EnforcementMode::Warn => {
                            if rule.effect == Effect::Deny {
                                warnings.push(format!(
                                    "policy {} would deny under enforce mode (warn-only)",
                                    manifest.id
                                ));
                            }
                            Effect::Allow
                        }
                        EnforcementMode::Monitor => Effect::Allow,
                    };

                    matched.push(Matched {
                        policy_id: manifest.id.clone(),
                        precedence: manifest.precedence,
                        effect: effective_effect,
                        reason,
                    });
                }
                None => {
                    evaluated_policies.push(EvaluatedPolicy {
                        policy_id: manifest.id.clone(),
                        precedence: manifest.precedence,
                        matched: false,
                        effect: None,
                        reason: "no rule matched".to_string(),
                    });
                }
            }
        }

        let mut result = if matched.is_empty() {
            EvaluationResult {
                allowed: true,
                winning_policy: None,
                evaluated_policies,
                reason: "no policy matched; default allow".to_string(),
                warnings,
                metadata: EvaluationMetadata { evaluation_time_ms: 0, policies_checked, conflicts_resolved: 0 },
            }
        } else {
            let outcome = resolve(&matched).expect("matched is non-empty, checked above");
            if let Some(conflict) = &outcome.conflict {
                warnings.push(format!(
                    "precedence conflict at {:?} among {:?}",
                    conflict.precedence, conflict.contributing_policy_ids
                ));
            }
            EvaluationResult {
                allowed: outcome.winner_effect == Effect::Allow,
                winning_policy: Some(WinningPolicy {
                    id: outcome.winner_policy_id.clone(),
                    precedence: outcome.winner_precedence,
                    effect: outcome.winner_effect,
                }),
                evaluated_policies,
                reason: format!(
                    "policy {} ({:?}) decided the outcome",
                    outcome.winner_policy_id, outcome.winner_effect
                ),
                warnings,
                metadata: EvaluationMetadata {
                    evaluation_time_ms: 0,
                    policies_checked,
                    conflicts_resolved: u64::from(outcome.conflict.is_some()),
                },
            }
        };

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        result.metadata.evaluation_time_ms = elapsed_ms;

        let timed_out = elapsed_ms > self.deadline_ms;
        if timed_out {
            result.allowed = false;
            result.winning_policy = None;
            result.reason = format!(
                "timeout: evaluation exceeded deadline of {}ms (took {}ms); deny by default",
                self.deadline_ms, elapsed_ms
            );
            result.warnings.push("evaluation deadline exceeded".to_string());
        }

        observer::notify_observer(&result, request, timed_out);
        result
    }

    /// Convenience wrapper around [`Self::evaluate`] returning just the
    /// allow/deny bit.
    #[must_use]
    pub fn is_allowed(&self, request: &EvaluationRequest) -> bool {
        self.evaluate(request).allowed
    }
}

/// First rule (in declaration order) whose conditions all hold, plus the
/// reason string recorded against it. Condition warnings accumulate into
/// `warnings` regardless of which rule ultimately matches.
fn first_matching_rule<'a>(
    rules: &'a [Rule],
    request_value: &Value,
    warnings: &mut Vec<String>,
) -> Option<(&'a Rule, String)> {
    for rule in rules {
        let mut all_match = true;
        for cond in &rule.conditions {
            let (is_match, warning) = condition::eval(cond, request_value);
            if let Some(w) = warning {
                warnings.push(w);
            }
            if !is_match {
                all_match = false;
                break;
            }
        }
        if all_match {
            return Some((rule, format!("rule {} matched", rule.id)));
        }
    }
    None
}
