use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use std::collections::BTreeMap;
use vaultline_license::{
    AirGapLicense, KeySigner, LicenseClaims, LicenseConfig, SigningScheme, Tier,
    issue_license_key, revocation_hash, sign_license_file, sign_revocation_list,
};
use vaultline_licensectl::{
    BundleCheck, BundleProblem, Report, inspect_bundle, tier_table, verify_key, verify_token,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn license_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn vendor_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

fn config() -> LicenseConfig {
    LicenseConfig {
        license_public_key: hex::encode(license_key().verifying_key().as_bytes()),
        entitlement_public_key: hex::encode(vendor_key().verifying_key().as_bytes()),
        ..LicenseConfig::default()
    }
}

fn claims(days: i64) -> LicenseClaims {
    let expires = now() + Duration::days(days);
    LicenseClaims {
        tier: Tier::Pro,
        customer_id: "cust-2002".to_string(),
        customer_name: "Storage Ops".to_string(),
        company: "Northwind Archive".to_string(),
        issued_at: (expires - Duration::days(365)).timestamp(),
        expires_at: expires.timestamp(),
        trial: false,
        trial_days: 0,
    }
}

fn bundle(hardware_id: Option<&str>) -> AirGapLicense {
    AirGapLicense {
        id: "LIC-9F2C".to_string(),
        tier: Tier::Enterprise,
        organization: "Northwind Archive".to_string(),
        email: "it@northwind.example".to_string(),
        features: vec!["air_gap".to_string()],
        limits: BTreeMap::new(),
        issued_at: now() - Duration::days(10),
        expires_at: now() + Duration::days(355),
        air_gap_enabled: true,
        hardware_id: hardware_id.map(str::to_string),
    }
}

// ── verify-key ───────────────────────────────────────────────────

#[test]
fn valid_key_reports_claims() {
    let key = issue_license_key(&claims(30), &KeySigner::Ed25519(license_key())).unwrap();
    let report = verify_key(&key, &config(), now()).unwrap();

    assert_eq!(report.tier, Tier::Pro);
    assert_eq!(report.customer_id, "cust-2002");
    assert!(report.is_valid());
    let text = report.to_string();
    assert!(text.contains("Pro"));
    assert!(text.contains("ed25519"));
}

#[test]
fn expired_key_verifies_but_is_not_valid() {
    let key = issue_license_key(&claims(-1), &KeySigner::Ed25519(license_key())).unwrap();
    let report = verify_key(&key, &config(), now()).unwrap();
    assert!(report.expired);
    assert!(!report.is_valid());
    assert!(report.to_string().contains("EXPIRED"));
}

#[test]
fn key_from_wrong_signer_fails() {
    let key = issue_license_key(&claims(30), &KeySigner::Ed25519(vendor_key())).unwrap();
    let err = verify_key(&key, &config(), now()).unwrap_err();
    assert!(format!("{err:#}").contains("signature"));
}

#[test]
fn hmac_keys_verify_with_secret() {
    let key = issue_license_key(&claims(30), &KeySigner::Hmac(b"s3cret".to_vec())).unwrap();
    let mut config = config();
    config.signing_scheme = SigningScheme::Hmac;
    config.license_hmac_secret = Some("s3cret".to_string());

    let report = verify_key(&key, &config, now()).unwrap();
    assert_eq!(report.scheme, SigningScheme::Hmac);
}

// ── verify-token ─────────────────────────────────────────────────

#[test]
fn garbage_token_fails() {
    assert!(verify_token("not-a-token", &config(), now()).is_err());
}

// ── inspect-bundle ───────────────────────────────────────────────

#[test]
fn clean_bundle_is_usable() {
    let file = sign_license_file(&bundle(None), &vendor_key()).unwrap();
    let report = inspect_bundle(&file, &BundleCheck::default(), &config(), now()).unwrap();

    assert!(report.is_valid());
    assert_eq!(report.revocation_hash, revocation_hash("LIC-9F2C"));
    assert!(report.to_string().contains("Status:     OK"));
}

#[test]
fn revoked_bundle_is_reported() {
    let file = sign_license_file(&bundle(None), &vendor_key()).unwrap();
    let list = sign_revocation_list(4, &[revocation_hash("LIC-9F2C")], &vendor_key()).unwrap();
    let check = BundleCheck {
        revocations: Some(&list),
        hardware_id: None,
    };

    let report = inspect_bundle(&file, &check, &config(), now()).unwrap();

    assert_eq!(report.problems, vec![BundleProblem::Revoked]);
    assert_eq!(report.revocation_list_version, Some(4));
    assert!(!report.is_valid());
}

#[test]
fn hardware_binding_is_checked_when_given() {
    let file = sign_license_file(&bundle(Some("a1b2c3")), &vendor_key()).unwrap();

    let unchecked = inspect_bundle(&file, &BundleCheck::default(), &config(), now()).unwrap();
    assert!(unchecked.is_valid());

    let check = BundleCheck {
        revocations: None,
        hardware_id: Some("ffff00"),
    };
    let report = inspect_bundle(&file, &check, &config(), now()).unwrap();
    assert_eq!(report.problems, vec![BundleProblem::HardwareMismatch]);
}

#[test]
fn expired_bundle_is_reported() {
    let file = sign_license_file(&bundle(None), &vendor_key()).unwrap();
    let later = now() + Duration::days(400);
    let report = inspect_bundle(&file, &BundleCheck::default(), &config(), later).unwrap();
    assert_eq!(report.problems, vec![BundleProblem::Expired]);
}

#[test]
fn bundle_signed_by_another_vendor_fails() {
    let file = sign_license_file(&bundle(None), &license_key()).unwrap();
    assert!(inspect_bundle(&file, &BundleCheck::default(), &config(), now()).is_err());
}

// ── tiers ────────────────────────────────────────────────────────

#[test]
fn tier_table_serializes_sentinel_for_unlimited() {
    let json = serde_json::to_value(tier_table()).unwrap();
    assert_eq!(json[2]["tier"], "enterprise");
    assert_eq!(json[2]["limits"]["max_agents"], -1);
    assert_eq!(json[0]["limits"]["max_agents"], 3);
}
