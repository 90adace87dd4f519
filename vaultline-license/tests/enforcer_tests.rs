mod common;

use chrono::Duration;
use common::{FakeCounter, claims, entitlement_signing_key, fixed_now, make_entitlement};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use vaultline_license::{
    EntitlementStore, Feature, License, LicenseError, Limit, LimitEnforcer, ManualClock,
    OrganizationId, Resource, Tier, ValidationState, verify_entitlement_token,
};

fn enforcer_for(tier: Tier, counter: Arc<FakeCounter>) -> (LimitEnforcer, Arc<EntitlementStore>) {
    let store = Arc::new(EntitlementStore::new());
    let now = fixed_now();
    if tier != Tier::Free {
        store.set_license(
            License::from_claims(&claims(tier, now, now + Duration::days(400))),
            ValidationState::Active,
        );
    }
    let clock = Arc::new(ManualClock::new(now));
    (
        LimitEnforcer::new(Arc::clone(&store), counter, clock),
        store,
    )
}

// ── Resource limits ──────────────────────────────────────────────

#[test]
fn free_tier_admits_below_limit() {
    let (enforcer, _) = enforcer_for(Tier::Free, Arc::new(FakeCounter::with_agents(2)));
    assert!(enforcer.can_add_agent().is_ok());
}

#[test]
fn free_tier_rejects_at_limit() {
    let (enforcer, _) = enforcer_for(Tier::Free, Arc::new(FakeCounter::with_agents(3)));
    match enforcer.can_add_agent() {
        Err(LicenseError::LimitExceeded {
            resource,
            limit,
            current,
        }) => {
            assert_eq!(resource, Resource::Agents);
            assert_eq!(limit, 3);
            assert_eq!(current, 3);
        }
        other => panic!("expected LimitExceeded, got {other:?}"),
    }
}

#[test]
fn limit_error_is_user_facing_with_hint() {
    let (enforcer, _) = enforcer_for(Tier::Free, Arc::new(FakeCounter::with_agents(5)));
    let err = enforcer.can_add_agent().unwrap_err();
    assert!(err.is_user_facing());
    assert!(err.upgrade_hint().unwrap().contains("Upgrade"));
}

#[test]
fn users_and_organizations_are_checked() {
    let counter = Arc::new(FakeCounter::default());
    counter.users.store(3, Ordering::SeqCst);
    counter.organizations.store(1, Ordering::SeqCst);
    let (enforcer, _) = enforcer_for(Tier::Free, Arc::clone(&counter));

    assert!(enforcer.can_add_user().is_err());
    assert!(enforcer.can_add_organization().is_err());

    let (pro, _) = enforcer_for(Tier::Pro, counter);
    assert!(pro.can_add_user().is_ok());
    assert!(pro.can_add_organization().is_ok());
}

#[test]
fn repositories_are_limited_per_organization() {
    let counter = Arc::new(FakeCounter::default());
    let busy = OrganizationId::new();
    let quiet = OrganizationId::new();
    counter.set_repositories(busy, 2);
    counter.set_repositories(quiet, 1);
    let (enforcer, _) = enforcer_for(Tier::Free, counter);

    assert!(matches!(
        enforcer.can_add_repository(busy),
        Err(LicenseError::LimitExceeded {
            resource: Resource::Repositories,
            ..
        })
    ));
    assert!(enforcer.can_add_repository(quiet).is_ok());
}

#[test]
fn storage_check_includes_incoming_bytes() {
    const GIB: u64 = 1024 * 1024 * 1024;
    let counter = Arc::new(FakeCounter::default());
    counter.storage_bytes.store(99 * GIB, Ordering::SeqCst);
    let (enforcer, _) = enforcer_for(Tier::Free, counter);

    assert!(enforcer.can_store(GIB).is_ok());
    assert!(matches!(
        enforcer.can_store(GIB + 1),
        Err(LicenseError::LimitExceeded {
            resource: Resource::Storage,
            ..
        })
    ));
}

#[test]
fn enterprise_is_never_limited() {
    let counter = Arc::new(FakeCounter::with_agents(1_000_000));
    counter.storage_bytes.store(u64::MAX / 2, Ordering::SeqCst);
    let (enforcer, _) = enforcer_for(Tier::Enterprise, counter);
    assert!(enforcer.can_add_agent().is_ok());
    assert!(enforcer.can_store(u64::MAX).is_ok());
}

#[test]
fn counting_failure_is_not_limit_exceeded() {
    let counter = Arc::new(FakeCounter::default());
    counter.failing.store(true, Ordering::SeqCst);
    let (enforcer, _) = enforcer_for(Tier::Free, counter);

    match enforcer.can_add_agent() {
        Err(LicenseError::Counting(msg)) => assert!(msg.contains("database unavailable")),
        other => panic!("expected Counting, got {other:?}"),
    }
    assert!(matches!(
        enforcer.can_add_repository(OrganizationId::new()),
        Err(LicenseError::Counting(_))
    ));
}

#[test]
fn entitlement_limits_override_tier() {
    let counter = Arc::new(FakeCounter::with_agents(30));
    let (enforcer, store) = enforcer_for(Tier::Pro, counter);
    assert!(enforcer.can_add_agent().is_err());

    let now = fixed_now();
    let token = make_entitlement("pro", &["sso"], &[("agents", 50)], now, now + Duration::days(1));
    let ent = verify_entitlement_token(&token, &entitlement_signing_key().verifying_key()).unwrap();
    store.set_entitlement(ent, token);

    assert!(enforcer.can_add_agent().is_ok());
    assert_eq!(enforcer.limit(Resource::Agents), Limit::Count(50));
}

// ── Feature gates ────────────────────────────────────────────────

#[test]
fn pro_gets_sso_not_air_gap() {
    let (enforcer, _) = enforcer_for(Tier::Pro, Arc::new(FakeCounter::default()));
    assert!(enforcer.require_sso().is_ok());
    assert!(enforcer.require_audit_logs().is_ok());
    assert!(enforcer.require_dr_runbooks().is_ok());
    match enforcer.require_air_gap() {
        Err(LicenseError::FeatureNotLicensed { feature, required }) => {
            assert_eq!(feature, Feature::AirGap);
            assert_eq!(required, Tier::Enterprise);
        }
        other => panic!("expected FeatureNotLicensed, got {other:?}"),
    }
    assert!(enforcer.require_multi_org().is_err());
}

#[test]
fn free_tier_has_no_sso() {
    let (enforcer, _) = enforcer_for(Tier::Free, Arc::new(FakeCounter::default()));
    let err = enforcer.require_sso().unwrap_err();
    assert!(err.is_user_facing());
    assert!(err.upgrade_hint().unwrap().contains("Pro"));
}

#[test]
fn entitlement_grants_ad_hoc_feature() {
    let (enforcer, store) = enforcer_for(Tier::Pro, Arc::new(FakeCounter::default()));
    let now = fixed_now();
    let token = make_entitlement("pro", &["sso", "air_gap"], &[], now, now + Duration::days(1));
    let ent = verify_entitlement_token(&token, &entitlement_signing_key().verifying_key()).unwrap();
    store.set_entitlement(ent, token);

    assert!(enforcer.require_air_gap().is_ok());
    // The entitlement's list is authoritative while it is valid.
    assert!(enforcer.require_audit_logs().is_err());
}

#[test]
fn granted_features_are_recorded_for_heartbeat() {
    let (enforcer, store) = enforcer_for(Tier::Pro, Arc::new(FakeCounter::default()));
    enforcer.require_sso().unwrap();
    let _ = enforcer.require_air_gap();

    let used = store.take_feature_usage();
    assert!(used.contains(&Feature::Sso));
    assert!(!used.contains(&Feature::AirGap));
}

// ── Usage report ─────────────────────────────────────────────────

#[test]
fn usage_report_lists_counts_and_limits() {
    let counter = Arc::new(FakeCounter::with_agents(2));
    counter.users.store(1, Ordering::SeqCst);
    let (enforcer, _) = enforcer_for(Tier::Free, counter);

    let report = enforcer.usage_report();
    assert_eq!(report.tier, Tier::Free);
    let agents = report
        .resources
        .iter()
        .find(|r| r.resource == Resource::Agents)
        .unwrap();
    assert_eq!(agents.current, Some(2));
    assert_eq!(agents.limit, Limit::Count(3));
    assert!(!agents.is_at_limit());
    assert!(report.features.contains(&"email_reports".to_string()));
    assert!(report.resources.iter().all(|r| r.resource != Resource::Repositories));
}

#[test]
fn usage_report_tolerates_counting_failure() {
    let counter = Arc::new(FakeCounter::default());
    counter.failing.store(true, Ordering::SeqCst);
    let (enforcer, _) = enforcer_for(Tier::Pro, counter);
    let report = enforcer.usage_report();
    assert!(report.resources.iter().all(|r| r.current.is_none()));
}

// ── Properties ───────────────────────────────────────────────────

proptest! {
    /// The unlimited sentinel admits any count.
    #[test]
    fn unlimited_never_exceeded(agents in any::<u64>(), users in any::<u64>()) {
        let counter = Arc::new(FakeCounter::with_agents(agents));
        counter.users.store(users, Ordering::SeqCst);
        let (enforcer, _) = enforcer_for(Tier::Enterprise, counter);
        prop_assert!(enforcer.can_add_agent().is_ok());
        prop_assert!(enforcer.can_add_user().is_ok());
    }

    /// A finite limit rejects exactly when the count has reached it.
    #[test]
    fn finite_limit_boundary(agents in 0u64..100) {
        let (enforcer, _) = enforcer_for(Tier::Pro, Arc::new(FakeCounter::with_agents(agents)));
        prop_assert_eq!(enforcer.can_add_agent().is_err(), agents >= 25);
    }
}
