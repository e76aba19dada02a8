//! Precedence resolution: a pure function from a set of matched policies to
//! a single winner plus an optional conflict record.
//!
//! This is the generalization of a priority -> most-restrictive ->
//! first-match rule interpreter to the kernel's fixed three-class
//! precedence order, with deny standing in for "most restrictive" since
//! `allow`/`deny` is the only effect pair in play.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use kernel_core::model::{Effect, Precedence};
use serde::Serialize;

/// One matched policy as seen by the resolver: its precedence class, the
/// effect its matching rule produced, and why.
#[derive(Debug, Clone)]
pub struct Matched {
    /// Policy id, used for stable ordering and conflict reporting.
    pub policy_id: String,
    /// Precedence class.
    pub precedence: Precedence,
    /// Effect produced by the matching rule.
    pub effect: Effect,
    /// Reason the policy matched (e.g. `"rule r1 matched"`).
    pub reason: String,
}

/// Record of a precedence-class tie between conflicting effects. Names
/// every policy at the winning precedence so callers can audit the
/// decision, not just the winner.
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    /// Precedence class the conflict occurred at.
    pub precedence: Precedence,
    /// Ids of every policy that contributed to the tied precedence class.
    pub contributing_policy_ids: Vec<String>,
}

/// Result of [`resolve`]: the winning policy id/effect and, if the
/// contributing set disagreed, a [`Conflict`] record.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Id of the policy whose effect is the final decision.
    pub winner_policy_id: String,
    /// Precedence class of the winner.
    pub winner_precedence: Precedence,
    /// Effect that became the decision.
    pub winner_effect: Effect,
    /// Present iff the retained set at the winning precedence contained
    /// both effects.
    pub conflict: Option<Conflict>,
}

/// Error returned when [`resolve`] is called with an empty match set. The
/// resolver's contract requires at least one matched policy; an empty call
/// is an invariant violation at the call site, not a normal outcome.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("resolve called with an empty match set")]
pub struct EmptyMatchSet;

/// Resolve a non-empty set of matched policies to a single winner.
///
/// Algorithm: keep only entries at the maximum precedence present; if that
/// retained set contains both effects, flag a conflict and let any `deny`
/// win ("deny wins at tied precedence"); otherwise the first entry in
/// input order wins.
///
/// # Errors
/// Returns [`EmptyMatchSet`] if `matched` is empty — callers must never
/// invoke the resolver without at least one match (the evaluation engine
/// short-circuits before reaching here in that case).
pub fn resolve(matched: &[Matched]) -> Result<Outcome, EmptyMatchSet> {
    let top = matched.iter().map(|m| m.precedence).max().ok_or(EmptyMatchSet)?;
    let retained: Vec<&Matched> = matched.iter().filter(|m| m.precedence == top).collect();

    let has_allow = retained.iter().any(|m| m.effect == Effect::Allow);
    let has_deny = retained.iter().any(|m| m.effect == Effect::Deny);

    let winner = if has_allow && has_deny {
        retained.iter().find(|m| m.effect == Effect::Deny).expect("has_deny checked above")
    } else {
        retained.first().expect("retained is non-empty: top came from this slice")
    };

    let conflict = (has_allow && has_deny).then(|| Conflict {
        precedence: top,
        contributing_policy_ids: retained.iter().map(|m| m.policy_id.clone()).collect(),
    });

    Ok(Outcome {
        winner_policy_id: winner.policy_id.clone(),
        winner_precedence: winner.precedence,
        winner_effect: winner.effect,
        conflict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str, p: Precedence, e: Effect) -> Matched {
        Matched { policy_id: id.to_string(), precedence: p, effect: e, reason: "test".to_string() }
    }

    #[test]
    fn empty_set_is_an_error() {
        assert!(resolve(&[]).is_err());
    }

    #[test]
    fn single_match_wins_outright() {
        let out = resolve(&[m("p1", Precedence::Internal, Effect::Allow)]).unwrap();
        assert_eq!(out.winner_policy_id, "p1");
        assert!(out.conflict.is_none());
    }

    #[test]
    fn higher_precedence_dominates_lower() {
        let out = resolve(&[
            m("internal-allow", Precedence::Internal, Effect::Allow),
            m("legal-deny", Precedence::Legal, Effect::Deny),
        ])
        .unwrap();
        assert_eq!(out.winner_policy_id, "legal-deny");
        assert_eq!(out.winner_effect, Effect::Deny);
        assert!(out.conflict.is_none());
    }

    #[test]
    fn deny_wins_at_tied_precedence_and_flags_conflict() {
        let out = resolve(&[
            m("legal-allow", Precedence::Legal, Effect::Allow),
            m("legal-deny", Precedence::Legal, Effect::Deny),
        ])
        .unwrap();
        assert_eq!(out.winner_effect, Effect::Deny);
        let conflict = out.conflict.expect("both effects present at tied precedence");
        assert_eq!(conflict.contributing_policy_ids.len(), 2);
    }

    #[test]
    fn first_match_wins_when_all_effects_agree() {
        let out = resolve(&[
            m("legal-allow-1", Precedence::Legal, Effect::Allow),
            m("legal-allow-2", Precedence::Legal, Effect::Allow),
        ])
        .unwrap();
        assert_eq!(out.winner_policy_id, "legal-allow-1");
        assert!(out.conflict.is_none());
    }

    #[test]
    fn precedence_chain_scenario() {
        // S4: legal allow + industry deny + internal allow, all match.
        let out = resolve(&[
            m("legal", Precedence::Legal, Effect::Allow),
            m("industry", Precedence::Industry, Effect::Deny),
            m("internal", Precedence::Internal, Effect::Allow),
        ])
        .unwrap();
        assert_eq!(out.winner_policy_id, "legal");
        assert_eq!(out.winner_precedence, Precedence::Legal);
        assert!(out.conflict.is_none());
    }
}
