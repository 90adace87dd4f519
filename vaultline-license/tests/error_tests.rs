use vaultline_license::{Feature, LicenseError, Resource, Tier};

#[test]
fn error_display_malformed_encoding() {
    let err = LicenseError::MalformedEncoding("expected 2 segments".into());
    let msg = format!("{err}");
    assert!(msg.contains("malformed license encoding"));
    assert!(msg.contains("2 segments"));
}

#[test]
fn error_display_invalid_signature() {
    let err = LicenseError::InvalidSignature;
    assert!(format!("{err}").contains("signature"));
}

#[test]
fn error_display_unknown_tier() {
    let err = LicenseError::UnknownTier("platinum".into());
    assert!(format!("{err}").contains("platinum"));
}

#[test]
fn error_display_expired() {
    let err = LicenseError::Expired("2026-01-01".into());
    let msg = format!("{err}");
    assert!(msg.contains("expired"));
    assert!(msg.contains("2026-01-01"));
}

#[test]
fn error_display_feature_not_licensed() {
    let err = LicenseError::FeatureNotLicensed {
        feature: Feature::AirGap,
        required: Tier::Enterprise,
    };
    let msg = format!("{err}");
    assert!(msg.contains("air_gap"));
    assert!(msg.contains("enterprise"));
}

#[test]
fn error_display_limit_exceeded() {
    let err = LicenseError::LimitExceeded {
        resource: Resource::Agents,
        limit: 3,
        current: 3,
    };
    assert_eq!(format!("{err}"), "agents limit reached (3 of 3)");
}

#[test]
fn error_display_killed_and_rejected() {
    assert!(format!("{}", LicenseError::Killed).contains("kill switch"));
    let err = LicenseError::Rejected("unknown key".into());
    assert!(format!("{err}").contains("unknown key"));
}

#[test]
fn error_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let err: LicenseError = io.into();
    assert!(matches!(err, LicenseError::Io(_)));
    assert!(format!("{err}").contains("read-only"));
}

#[test]
fn error_from_serde() {
    let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: LicenseError = bad.into();
    assert!(matches!(err, LicenseError::Serialization(_)));
}

#[test]
fn only_gating_errors_are_user_facing() {
    let gated = LicenseError::FeatureNotLicensed {
        feature: Feature::Sso,
        required: Tier::Pro,
    };
    assert!(gated.is_user_facing());
    assert!(!LicenseError::Revoked.is_user_facing());
    assert!(!LicenseError::Counting("db down".into()).is_user_facing());
    assert!(!LicenseError::NetworkUnavailable("timeout".into()).is_user_facing());
}

#[test]
fn only_network_errors_are_network() {
    assert!(LicenseError::NetworkUnavailable("timeout".into()).is_network());
    assert!(!LicenseError::Rejected("invalid".into()).is_network());
    assert!(!LicenseError::InvalidSignature.is_network());
}

#[test]
fn upgrade_hint_names_plan_and_feature() {
    let err = LicenseError::FeatureNotLicensed {
        feature: Feature::Sso,
        required: Tier::Pro,
    };
    let hint = err.upgrade_hint().unwrap();
    assert!(hint.contains("Single sign-on"));
    assert!(hint.contains("Pro"));

    let err = LicenseError::LimitExceeded {
        resource: Resource::Users,
        limit: 10,
        current: 10,
    };
    assert_eq!(
        err.upgrade_hint().as_deref(),
        Some("Your plan allows 10 users. Upgrade to add more.")
    );
    assert!(LicenseError::Revoked.upgrade_hint().is_none());
}
