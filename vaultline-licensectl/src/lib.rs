//! Offline inspection commands for Vaultline license material.
//!
//! Each command returns a serializable report; `main` prints it as text or
//! JSON. Nothing here talks to the licensing server.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use vaultline_license::{
    AirGapLicense, HardwareFingerprint, LicenseConfig, Limit, Resource, SigningScheme, Tier,
    TierLimits, decode_license_file, decode_revocation_list, features_for, limits_for,
    verify_entitlement_token, verify_license_key,
};

/// A command result that can fail verification without being an error.
pub trait Report: Serialize + fmt::Display {
    /// False when the inspected material should not be trusted.
    fn is_valid(&self) -> bool {
        true
    }
}

// ── verify-key ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct KeyReport {
    pub scheme: SigningScheme,
    pub tier: Tier,
    pub customer_id: String,
    pub customer_name: String,
    pub company: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub trial: bool,
}

impl Report for KeyReport {
    fn is_valid(&self) -> bool {
        !self.expired
    }
}

impl fmt::Display for KeyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Signature:  valid ({})", scheme_name(self.scheme))?;
        writeln!(f, "Tier:       {}", self.tier.display_name())?;
        writeln!(f, "Customer:   {} ({})", self.customer_name, self.customer_id)?;
        if !self.company.is_empty() {
            writeln!(f, "Company:    {}", self.company)?;
        }
        writeln!(f, "Issued:     {}", self.issued_at.format("%Y-%m-%d"))?;
        write!(f, "Expires:    {}", self.expires_at.format("%Y-%m-%d"))?;
        if self.expired {
            write!(f, " (EXPIRED)")?;
        }
        if self.trial {
            write!(f, "\nTrial:      yes")?;
        }
        Ok(())
    }
}

/// Verifies a license key's signature and decodes its claims.
pub fn verify_key(key: &str, config: &LicenseConfig, now: DateTime<Utc>) -> Result<KeyReport> {
    let verifier = config
        .license_verifier()
        .context("Failed to build license key verifier")?;
    let claims = verify_license_key(key, &verifier).context("License key rejected")?;
    Ok(KeyReport {
        scheme: verifier.scheme(),
        tier: claims.tier,
        expired: claims.is_expired_at(now),
        issued_at: claims.issued_at_time(),
        expires_at: claims.expires_at_time(),
        customer_id: claims.customer_id,
        customer_name: claims.customer_name,
        company: claims.company,
        trial: claims.trial,
    })
}

// ── verify-token ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TokenReport {
    pub tier: Tier,
    pub features: BTreeSet<String>,
    pub limits: TierLimits,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

impl Report for TokenReport {
    fn is_valid(&self) -> bool {
        !self.expired
    }
}

impl fmt::Display for TokenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Signature:  valid")?;
        writeln!(f, "Tier:       {}", self.tier.display_name())?;
        writeln!(f, "Nonce:      {}", self.nonce)?;
        writeln!(f, "Expires:    {}{}", self.expires_at.to_rfc3339(), expired_tag(self.expired))?;
        writeln!(f, "Features:   {}", join(&self.features))?;
        write_limits(f, &self.limits)
    }
}

/// Verifies an entitlement token and decodes its grant.
pub fn verify_token(token: &str, config: &LicenseConfig, now: DateTime<Utc>) -> Result<TokenReport> {
    let key = config
        .entitlement_key()
        .context("Failed to parse entitlement public key")?;
    let entitlement = verify_entitlement_token(token, &key).context("Entitlement token rejected")?;
    Ok(TokenReport {
        expired: entitlement.is_expired_at(now),
        tier: entitlement.tier,
        features: entitlement.features,
        limits: entitlement.limits,
        nonce: entitlement.nonce,
        issued_at: entitlement.issued_at,
        expires_at: entitlement.expires_at,
    })
}

// ── inspect-bundle ───────────────────────────────────────────────

/// Why an otherwise authentic air-gap license would not be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleProblem {
    Expired,
    Revoked,
    HardwareMismatch,
}

impl fmt::Display for BundleProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expired => "license has expired",
            Self::Revoked => "license id is on the revocation list",
            Self::HardwareMismatch => "license is bound to a different machine",
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BundleReport {
    pub license: AirGapLicense,
    pub revocation_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_list_version: Option<u64>,
    pub problems: Vec<BundleProblem>,
}

impl Report for BundleReport {
    fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for BundleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let license = &self.license;
        writeln!(f, "Signature:  valid")?;
        writeln!(f, "License:    {}", license.id)?;
        writeln!(f, "Tier:       {}", license.tier.display_name())?;
        writeln!(f, "Org:        {}", license.organization)?;
        writeln!(f, "Expires:    {}", license.expires_at.to_rfc3339())?;
        writeln!(f, "Air gap:    {}", if license.air_gap_enabled { "enabled" } else { "disabled" })?;
        if let Some(hardware_id) = &license.hardware_id {
            writeln!(f, "Bound to:   {hardware_id}")?;
        }
        writeln!(f, "Rev. hash:  {}", self.revocation_hash)?;
        if let Some(version) = self.revocation_list_version {
            writeln!(f, "Rev. list:  version {version}")?;
        }
        if self.problems.is_empty() {
            write!(f, "Status:     OK")
        } else {
            write!(f, "Status:     NOT USABLE")?;
            for problem in &self.problems {
                write!(f, "\n  - {problem}")?;
            }
            Ok(())
        }
    }
}

/// Options for [`inspect_bundle`].
#[derive(Debug, Default)]
pub struct BundleCheck<'a> {
    /// Signed revocation list to check the license id against.
    pub revocations: Option<&'a [u8]>,
    /// Fingerprint to compare a hardware binding with. Without it the
    /// binding is reported but not checked.
    pub hardware_id: Option<&'a str>,
}

/// Verifies an air-gap license file, optionally against a revocation list
/// and a machine fingerprint.
pub fn inspect_bundle(
    bundle: &[u8],
    check: &BundleCheck<'_>,
    config: &LicenseConfig,
    now: DateTime<Utc>,
) -> Result<BundleReport> {
    let key = config
        .entitlement_key()
        .context("Failed to parse entitlement public key")?;
    let license = decode_license_file(bundle, &key).context("License file rejected")?;

    let revocations = check
        .revocations
        .map(|blob| decode_revocation_list(blob, &key).context("Revocation list rejected"))
        .transpose()?;

    let mut problems = Vec::new();
    if license.is_expired_at(now) {
        problems.push(BundleProblem::Expired);
    }
    if revocations
        .as_ref()
        .is_some_and(|set| set.contains(&license.revocation_hash()))
    {
        problems.push(BundleProblem::Revoked);
    }
    if let (Some(bound), Some(machine)) = (&license.hardware_id, check.hardware_id)
        && !HardwareFingerprint::from_id(machine).matches(bound)
    {
        problems.push(BundleProblem::HardwareMismatch);
    }

    Ok(BundleReport {
        revocation_hash: license.revocation_hash(),
        revocation_list_version: revocations.map(|set| set.version),
        license,
        problems,
    })
}

// ── fingerprint ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FingerprintReport {
    pub hardware_id: String,
}

impl Report for FingerprintReport {}

impl fmt::Display for FingerprintReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hardware_id)
    }
}

/// Reads this machine's fingerprint, for binding air-gap licenses.
pub fn fingerprint() -> Result<FingerprintReport> {
    let fp = HardwareFingerprint::current().context("Failed to fingerprint this machine")?;
    Ok(FingerprintReport {
        hardware_id: fp.id().to_string(),
    })
}

// ── tiers ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TierRow {
    pub tier: Tier,
    pub limits: TierLimits,
    pub features: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TierTable(pub Vec<TierRow>);

impl Report for TierTable {}

impl fmt::Display for TierTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", row.tier.display_name())?;
            writeln!(f, "  Features:   {}", row.features.join(", "))?;
            write_limits(f, &row.limits)?;
        }
        Ok(())
    }
}

/// The built-in tier policy.
#[must_use]
pub fn tier_table() -> TierTable {
    TierTable(
        Tier::ALL
            .into_iter()
            .map(|tier| TierRow {
                tier,
                limits: limits_for(tier),
                features: features_for(tier)
                    .into_iter()
                    .map(|f| f.as_str().to_string())
                    .collect(),
            })
            .collect(),
    )
}

// ── Formatting helpers ───────────────────────────────────────────

fn write_limits(f: &mut fmt::Formatter<'_>, limits: &TierLimits) -> fmt::Result {
    for resource in Resource::ALL {
        let value = match limits.get(resource) {
            Limit::Unlimited => "unlimited".to_string(),
            Limit::Count(n) if resource == Resource::Storage => format_bytes(n),
            Limit::Count(n) => n.to_string(),
        };
        writeln!(f, "  {:<12}{value}", format!("{resource}:"))?;
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{} GiB", bytes / GIB)
    } else {
        format!("{bytes} bytes")
    }
}

fn join(items: &BTreeSet<String>) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn expired_tag(expired: bool) -> &'static str {
    if expired { " (EXPIRED)" } else { "" }
}

fn scheme_name(scheme: SigningScheme) -> &'static str {
    match scheme {
        SigningScheme::Ed25519 => "ed25519",
        SigningScheme::Hmac => "hmac-sha256",
    }
}
