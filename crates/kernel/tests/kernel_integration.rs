//! End-to-end scenarios against the composed `GovernanceKernel`, covering
//! the seed scenarios from spec.md §8 that need more than one crate wired
//! together to observe (cache invalidation across a mutation, a template
//! derivation reaching the evaluation path, multi-policy precedence chains).

use std::sync::Arc;

use kernel::GovernanceKernelBuilder;
use kernel_core::model::{
    Effect, EnforcementMode, PolicyManifest, PolicyStatus, Precedence, Rule, Scope, Template,
};
use kernel_core::request::{EvaluationRequest, Resource};
use templates::DerivedPolicySpec;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

fn manifest(id: &str, precedence: Precedence, effect: Effect, scope: Scope) -> PolicyManifest {
    PolicyManifest {
        id: id.to_string(),
        name: id.to_string(),
        version: "1.0.0".to_string(),
        description: String::new(),
        precedence,
        status: PolicyStatus::Active,
        enforcement_mode: EnforcementMode::Enforce,
        scope,
        rules: vec![Rule { id: "r1".to_string(), description: String::new(), conditions: vec![], effect }],
        effective_date: None,
        expiration_date: None,
        metadata: None,
        inherited_from: None,
        overridden_properties: vec![],
        extended_properties: vec![],
    }
}

#[test]
fn scope_narrowing_then_precedence_tie_s5_through_kernel() {
    init_tracing();
    let kernel = GovernanceKernelBuilder::new("node-1").build().unwrap();
    kernel.register(manifest("global-deny", Precedence::Internal, Effect::Deny, Scope::default())).unwrap();
    kernel
        .register(manifest(
            "db-allow",
            Precedence::Internal,
            Effect::Allow,
            Scope { orchestras: ["db".to_string()].into(), ..Scope::default() },
        ))
        .unwrap();

    let db_request =
        EvaluationRequest { action: "read".to_string(), orchestra: Some("db".to_string()), ..Default::default() };
    assert!(!kernel.is_allowed(&db_request));

    let ui_request =
        EvaluationRequest { action: "read".to_string(), orchestra: Some("ui".to_string()), ..Default::default() };
    assert!(!kernel.is_allowed(&ui_request));
}

#[test]
fn derived_policy_from_template_flows_through_evaluation_and_cache() {
    init_tracing();
    let kernel = GovernanceKernelBuilder::new("node-1").build().unwrap();
    kernel
        .templates()
        .register(Template {
            id: "export-guard".to_string(),
            name: "Export guard".to_string(),
            kind: "data-access".to_string(),
            precedence: Precedence::Legal,
            base_scope: Scope { actions: ["export".to_string()].into(), ..Scope::default() },
            base_rules: vec![Rule {
                id: "base-deny".to_string(),
                description: String::new(),
                conditions: vec![],
                effect: Effect::Deny,
            }],
            metadata: None,
        })
        .unwrap();

    let spec = DerivedPolicySpec { template_id: "export-guard".to_string(), overrides: None, extensions: None };
    kernel.register_from_template("gdpr-export", "GDPR export guard", "1.0.0", &spec).unwrap();

    let request = EvaluationRequest {
        action: "export".to_string(),
        resource: Some(Resource { resource_type: "user_data".to_string(), id: "u1".to_string() }),
        ..Default::default()
    };
    assert!(!kernel.is_allowed(&request));
    assert_eq!(kernel.cache_stats().misses, 1);
    assert!(!kernel.is_allowed(&request));
    assert_eq!(kernel.cache_stats().hits, 1);
}

#[test]
fn mutation_invalidates_cache_across_the_whole_kernel_s6() {
    init_tracing();
    let kernel = GovernanceKernelBuilder::new("node-1").build().unwrap();
    kernel.register(manifest("legal-deny", Precedence::Legal, Effect::Deny, Scope::default())).unwrap();

    let request = EvaluationRequest { action: "delete".to_string(), ..Default::default() };
    assert!(!kernel.is_allowed(&request));
    assert_eq!(kernel.cache_stats().size, 1);

    kernel.disable("legal-deny", Some("incident rollback".to_string())).unwrap();
    assert_eq!(kernel.cache_stats().size, 0);
    assert!(kernel.is_allowed(&request));

    kernel.enable("legal-deny").unwrap();
    assert!(!kernel.is_allowed(&request));
}

#[test]
fn precedence_chain_s4_through_kernel() {
    init_tracing();
    let kernel = GovernanceKernelBuilder::new("node-1").build().unwrap();
    kernel.register(manifest("legal", Precedence::Legal, Effect::Allow, Scope::default())).unwrap();
    kernel.register(manifest("industry", Precedence::Industry, Effect::Deny, Scope::default())).unwrap();
    kernel.register(manifest("internal", Precedence::Internal, Effect::Allow, Scope::default())).unwrap();

    let result = kernel.evaluate(&EvaluationRequest { action: "act".to_string(), ..Default::default() });
    assert!(result.allowed);
    assert_eq!(result.winning_policy.unwrap().id, "legal");
    assert_eq!(result.metadata.conflicts_resolved, 0);
}

#[test]
fn rollout_status_tracks_immediate_strategy_completion() {
    init_tracing();
    let kernel = GovernanceKernelBuilder::new("node-1").build().unwrap();
    kernel.register(manifest("p1", Precedence::Internal, Effect::Allow, Scope::default())).unwrap();

    let status = kernel.rollout_status("p1").expect("immediate rollout tracked on register");
    assert_eq!(status.status, kernel_core::events::RolloutStatus::Completed);
    assert_eq!(status.strategy, kernel_core::events::RolloutStrategy::Immediate);
}
