//! Tier policy tests, including property tests for tier ordering.

use proptest::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use vaultline_license::{
    Feature, Limit, Resource, Tier, TierLimits, compare, features_for, features_for_name,
    limits_for, limits_for_name, required_tier, required_tier_for_name, tier_has_feature,
};

const GIB: u64 = 1024 * 1024 * 1024;

// ── Tier ─────────────────────────────────────────────────────────

#[test]
fn tier_order_is_free_pro_enterprise() {
    assert_eq!(compare(Tier::Free, Tier::Pro), Ordering::Less);
    assert_eq!(compare(Tier::Pro, Tier::Enterprise), Ordering::Less);
    assert_eq!(compare(Tier::Enterprise, Tier::Enterprise), Ordering::Equal);
    assert_eq!(compare(Tier::Enterprise, Tier::Free), Ordering::Greater);
}

#[test]
fn tier_parse_is_exact() {
    assert_eq!(Tier::parse("pro"), Some(Tier::Pro));
    assert_eq!(Tier::parse(" enterprise "), Some(Tier::Enterprise));
    assert_eq!(Tier::parse("PRO"), None);
    assert_eq!(Tier::parse("platinum"), None);
}

#[test]
fn tier_serde_uses_lowercase_names() {
    assert_eq!(serde_json::to_string(&Tier::Enterprise).unwrap(), "\"enterprise\"");
    let parsed: Tier = serde_json::from_str("\"free\"").unwrap();
    assert_eq!(parsed, Tier::Free);
}

// ── Limits ───────────────────────────────────────────────────────

#[test]
fn free_tier_limits() {
    let limits = limits_for(Tier::Free);
    assert_eq!(limits.max_agents, Limit::Count(3));
    assert_eq!(limits.max_users, Limit::Count(3));
    assert_eq!(limits.max_orgs, Limit::Count(1));
    assert_eq!(limits.max_servers, Limit::Count(1));
    assert_eq!(limits.max_storage_bytes, Limit::Count(100 * GIB));
    assert_eq!(limits.max_repositories, Limit::Count(2));
}

#[test]
fn pro_tier_limits() {
    let limits = limits_for(Tier::Pro);
    assert_eq!(limits.max_agents, Limit::Count(25));
    assert_eq!(limits.max_users, Limit::Count(10));
    assert_eq!(limits.max_orgs, Limit::Count(3));
    assert_eq!(limits.get(Resource::Storage), Limit::Count(1024 * GIB));
}

#[test]
fn enterprise_is_unlimited() {
    assert_eq!(limits_for(Tier::Enterprise), TierLimits::unlimited());
}

#[test]
fn unknown_tier_name_gets_lowest_tier_values() {
    assert_eq!(limits_for_name("platinum"), limits_for(Tier::Free));
    assert_eq!(features_for_name(""), features_for(Tier::Free));
}

#[test]
fn limit_serializes_with_sentinel() {
    assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "-1");
    assert_eq!(serde_json::to_string(&Limit::Count(7)).unwrap(), "7");
    assert_eq!(serde_json::from_str::<Limit>("-1").unwrap(), Limit::Unlimited);
    assert!(serde_json::from_str::<Limit>("-2").is_err());
}

#[test]
fn limit_reached_at_count() {
    assert!(!Limit::Count(3).is_reached_by(2));
    assert!(Limit::Count(3).is_reached_by(3));
    assert!(Limit::Count(0).is_reached_by(0));
    assert!(!Limit::Unlimited.is_reached_by(u64::MAX));
}

#[test]
fn overrides_accept_both_aliases() {
    let overrides: BTreeMap<String, i64> = [
        ("agents".to_string(), 40),
        ("max_orgs".to_string(), -1),
        ("repos".to_string(), 12),
        ("future_resource".to_string(), 9),
    ]
    .into_iter()
    .collect();
    let limits = limits_for(Tier::Pro).with_overrides(&overrides).unwrap();
    assert_eq!(limits.max_agents, Limit::Count(40));
    assert_eq!(limits.max_orgs, Limit::Unlimited);
    assert_eq!(limits.max_repositories, Limit::Count(12));
    assert_eq!(limits.max_users, Limit::Count(10));
}

// ── Features ─────────────────────────────────────────────────────

#[test]
fn pro_has_sso_but_not_air_gap() {
    assert!(tier_has_feature(Tier::Pro, Feature::Sso));
    assert!(!tier_has_feature(Tier::Pro, Feature::AirGap));
    assert!(tier_has_feature(Tier::Enterprise, Feature::AirGap));
}

#[test]
fn free_tier_features() {
    let features = features_for(Tier::Free);
    assert!(features.contains(&Feature::EmailReports));
    assert!(!features.contains(&Feature::Sso));
}

#[test]
fn required_tier_lookup() {
    assert_eq!(required_tier(Feature::DrRunbooks), Tier::Pro);
    assert_eq!(required_tier(Feature::LegalHold), Tier::Enterprise);
    assert_eq!(required_tier_for_name("multi_org"), Tier::Enterprise);
    assert_eq!(required_tier_for_name("teleportation"), Tier::Free);
}

#[test]
fn feature_wire_names_round_trip() {
    for feature in Feature::ALL {
        assert_eq!(Feature::parse(feature.as_str()), Some(feature));
        let json = serde_json::to_string(&feature).unwrap();
        assert_eq!(json, format!("\"{}\"", feature.as_str()));
    }
}

// ── Properties ───────────────────────────────────────────────────

fn tier_strategy() -> impl Strategy<Value = Tier> {
    prop_oneof![Just(Tier::Free), Just(Tier::Pro), Just(Tier::Enterprise)]
}

fn feature_strategy() -> impl Strategy<Value = Feature> {
    prop::sample::select(Feature::ALL.to_vec())
}

proptest! {
    /// A <= B implies every feature of A is available to B.
    #[test]
    fn features_never_regress_up_the_tiers(a in tier_strategy(), b in tier_strategy()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let high_features = features_for(high);
        for feature in features_for(low) {
            prop_assert!(high_features.contains(&feature));
            prop_assert!(tier_has_feature(high, feature));
        }
    }

    /// The explicit list and the order check agree.
    #[test]
    fn list_and_order_agree(tier in tier_strategy(), feature in feature_strategy()) {
        let in_list = features_for(tier).contains(&feature);
        let by_order = compare(tier, required_tier(feature)) != Ordering::Less;
        prop_assert_eq!(in_list, by_order);
        prop_assert_eq!(tier_has_feature(tier, feature), in_list);
    }

    /// Limits never shrink as the tier increases.
    #[test]
    fn limits_never_shrink(a in tier_strategy(), b in tier_strategy()) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        for resource in Resource::ALL {
            let (l, h) = (limits_for(low).get(resource), limits_for(high).get(resource));
            match (l.count(), h.count()) {
                (Some(l), Some(h)) => prop_assert!(l <= h),
                (None, Some(_)) => prop_assert!(false, "{resource} shrank from unlimited"),
                _ => {}
            }
        }
    }
}
