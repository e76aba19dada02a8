//! Property-based checks for the two precedence invariants that are
//! cheapest to state as pure properties of `resolve`.

use kernel_core::model::{Effect, Precedence};
use precedence::{resolve, Matched};
use proptest::prelude::*;

fn precedence_strategy() -> impl Strategy<Value = Precedence> {
    prop_oneof![
        Just(Precedence::Internal),
        Just(Precedence::Industry),
        Just(Precedence::Legal),
    ]
}

fn effect_strategy() -> impl Strategy<Value = Effect> {
    prop_oneof![Just(Effect::Allow), Just(Effect::Deny)]
}

fn matched_strategy() -> impl Strategy<Value = Matched> {
    ("[a-z]{3,8}", precedence_strategy(), effect_strategy()).prop_map(|(id, precedence, effect)| {
        Matched { policy_id: id, precedence, effect, reason: "generated".to_string() }
    })
}

proptest! {
    /// Invariant 2: adding a strictly-higher-precedence deny to any matched
    /// set changes the outcome to deny.
    #[test]
    fn precedence_monotonicity(mut matched in prop::collection::vec(matched_strategy(), 1..6)) {
        let max_precedence = matched.iter().map(|m| m.precedence).max().unwrap();
        prop_assume!(max_precedence != Precedence::Legal);
        matched.push(Matched {
            policy_id: "overriding-legal-deny".to_string(),
            precedence: Precedence::Legal,
            effect: Effect::Deny,
            reason: "generated".to_string(),
        });
        let outcome = resolve(&matched).unwrap();
        prop_assert_eq!(outcome.winner_effect, Effect::Deny);
        prop_assert_eq!(outcome.winner_precedence, Precedence::Legal);
    }

    /// Invariant 3: at a single precedence with both effects present, deny
    /// always wins regardless of input order.
    #[test]
    fn deny_wins_at_any_tie(ids in prop::collection::hash_set("[a-z]{3,8}", 2..5)) {
        let ids: Vec<String> = ids.into_iter().collect();
        prop_assume!(ids.len() >= 2);
        let mut matched: Vec<Matched> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Matched {
                policy_id: id.clone(),
                precedence: Precedence::Internal,
                effect: if i == 0 { Effect::Deny } else { Effect::Allow },
                reason: "generated".to_string(),
            })
            .collect();
        matched.reverse();
        let outcome = resolve(&matched).unwrap();
        prop_assert_eq!(outcome.winner_effect, Effect::Deny);
        prop_assert!(outcome.conflict.is_some());
    }
}
