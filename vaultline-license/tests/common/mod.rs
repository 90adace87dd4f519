//! Shared test helpers for licensing tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use vaultline_license::{
    AirGapLicense, EntitlementClaims, KeySigner, LicenseClaims, LicenseConfig, OrganizationId,
    ResourceCounter, Tier, issue_entitlement_token, issue_license_key,
};

/// Deterministic Ed25519 key for license keys.
pub fn license_signing_key() -> SigningKey {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    SigningKey::from_bytes(&seed)
}

/// Deterministic Ed25519 key for entitlement tokens and air-gap files.
pub fn entitlement_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn license_signer() -> KeySigner {
    KeySigner::Ed25519(license_signing_key())
}

/// Fixed "now" used across tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Config pointing at `server_url` and trusting the test keys.
pub fn test_config(server_url: &str) -> LicenseConfig {
    LicenseConfig {
        server_url: server_url.to_string(),
        license_public_key: hex::encode(license_signing_key().verifying_key().as_bytes()),
        entitlement_public_key: hex::encode(entitlement_signing_key().verifying_key().as_bytes()),
        request_timeout_secs: 2,
        ..LicenseConfig::default()
    }
}

pub fn claims(tier: Tier, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> LicenseClaims {
    LicenseClaims {
        tier,
        customer_id: "cust-1001".to_string(),
        customer_name: "Ops Team".to_string(),
        company: "Acme Backup Ltd".to_string(),
        issued_at: issued_at.timestamp(),
        expires_at: expires_at.timestamp(),
        trial: false,
        trial_days: 0,
    }
}

/// A signed key for `tier` expiring `days` from `now` (negative for the past).
pub fn make_key(tier: Tier, now: DateTime<Utc>, days: i64) -> String {
    let expires_at = now + Duration::days(days);
    let issued_at = expires_at.min(now) - Duration::days(365);
    issue_license_key(&claims(tier, issued_at, expires_at), &license_signer()).unwrap()
}

/// A signed entitlement token.
pub fn make_entitlement(
    tier: &str,
    features: &[&str],
    limits: &[(&str, i64)],
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    let claims = EntitlementClaims {
        tier: tier.to_string(),
        features: features.iter().map(|f| f.to_string()).collect(),
        limits: limits
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<_, _>>(),
        nonce: "nonce-7f3a".to_string(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
    };
    issue_entitlement_token(&claims, &entitlement_signing_key()).unwrap()
}

pub fn air_gap_license(id: &str, tier: Tier, expires_at: DateTime<Utc>) -> AirGapLicense {
    AirGapLicense {
        id: id.to_string(),
        tier,
        organization: "Acme Backup Ltd".to_string(),
        email: "ops@acme.example".to_string(),
        features: vec!["sso".to_string(), "audit_logs".to_string()],
        limits: BTreeMap::new(),
        issued_at: expires_at - Duration::days(365),
        expires_at,
        air_gap_enabled: true,
        hardware_id: None,
    }
}

/// In-memory resource counter with adjustable counts.
#[derive(Debug, Default)]
pub struct FakeCounter {
    pub agents: AtomicU64,
    pub users: AtomicU64,
    pub organizations: AtomicU64,
    pub servers: AtomicU64,
    pub storage_bytes: AtomicU64,
    pub repositories: Mutex<HashMap<OrganizationId, u64>>,
    pub failing: AtomicBool,
}

impl FakeCounter {
    pub fn with_agents(agents: u64) -> Self {
        let counter = Self::default();
        counter.agents.store(agents, Ordering::SeqCst);
        counter
    }

    pub fn set_repositories(&self, org: OrganizationId, count: u64) {
        self.repositories.lock().unwrap().insert(org, count);
    }

    fn read(&self, value: &AtomicU64) -> anyhow::Result<u64> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("database unavailable");
        }
        Ok(value.load(Ordering::SeqCst))
    }
}

impl ResourceCounter for FakeCounter {
    fn count_agents(&self) -> anyhow::Result<u64> {
        self.read(&self.agents)
    }

    fn count_users(&self) -> anyhow::Result<u64> {
        self.read(&self.users)
    }

    fn count_organizations(&self, _scope: Option<OrganizationId>) -> anyhow::Result<u64> {
        self.read(&self.organizations)
    }

    fn count_repositories(&self, org: OrganizationId) -> anyhow::Result<u64> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("database unavailable");
        }
        Ok(self.repositories.lock().unwrap().get(&org).copied().unwrap_or(0))
    }

    fn count_servers(&self) -> anyhow::Result<u64> {
        self.read(&self.servers)
    }

    fn storage_bytes_used(&self) -> anyhow::Result<u64> {
        self.read(&self.storage_bytes)
    }
}
