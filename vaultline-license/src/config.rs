//! Licensing configuration.

use crate::codec::{
    ENTITLEMENT_PUBLIC_KEY, KeyVerifier, LICENSE_PUBLIC_KEY, SigningScheme, parse_public_key_hex,
};
use crate::error::{LicenseError, LicenseResult};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest grace window a config may ask for.
pub const MAX_GRACE_PERIOD_DAYS: i64 = 365;

/// Configuration for the licensing core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Base URL of the licensing server (e.g. `https://licensing.vaultline.io`).
    pub server_url: String,
    /// Scheme used to verify license keys.
    pub signing_scheme: SigningScheme,
    /// Hex-encoded Ed25519 key for license keys.
    pub license_public_key: String,
    /// Shared secret for HMAC-signed license keys.
    pub license_hmac_secret: Option<String>,
    /// Hex-encoded Ed25519 key for entitlement tokens and air-gap files.
    pub entitlement_public_key: String,
    pub request_timeout_secs: u64,
    pub validation_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub grace_period_days: i64,
    /// Air-gap license file.
    pub license_file: Option<PathBuf>,
    /// Air-gap revocation list.
    pub revocation_file: Option<PathBuf>,
    /// Reported to the licensing server.
    pub product_version: String,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            server_url: "https://licensing.vaultline.io".to_string(),
            signing_scheme: SigningScheme::Ed25519,
            license_public_key: hex::encode(LICENSE_PUBLIC_KEY),
            license_hmac_secret: None,
            entitlement_public_key: hex::encode(ENTITLEMENT_PUBLIC_KEY),
            request_timeout_secs: 30,
            validation_interval_secs: 24 * 60 * 60,
            heartbeat_interval_secs: 24 * 60 * 60,
            grace_period_days: 30,
            license_file: None,
            revocation_file: None,
            product_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl LicenseConfig {
    /// Loads a JSON config file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> LicenseResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LicenseError::NotFound(path.display().to_string()),
            _ => LicenseError::Io(e),
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the licensing core cannot work with.
    pub fn validate(&self) -> LicenseResult<()> {
        if !(0..=MAX_GRACE_PERIOD_DAYS).contains(&self.grace_period_days) {
            return Err(LicenseError::InvalidConfig(format!(
                "grace_period_days must be between 0 and {MAX_GRACE_PERIOD_DAYS}, got {}",
                self.grace_period_days
            )));
        }
        Ok(())
    }

    /// Builds the license key verifier for the configured scheme.
    pub fn license_verifier(&self) -> LicenseResult<KeyVerifier> {
        match self.signing_scheme {
            SigningScheme::Ed25519 => KeyVerifier::ed25519_hex(&self.license_public_key),
            SigningScheme::Hmac => {
                let secret = self.license_hmac_secret.as_deref().ok_or_else(|| {
                    LicenseError::InvalidKeyMaterial(
                        "signing_scheme is hmac but no license_hmac_secret is set".to_string(),
                    )
                })?;
                KeyVerifier::hmac(secret)
            }
        }
    }

    /// Builds the entitlement token / air-gap verifying key.
    pub fn entitlement_key(&self) -> LicenseResult<VerifyingKey> {
        parse_public_key_hex(&self.entitlement_public_key)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs.max(1))
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// The grace window, clamped to the range [`Self::validate`] accepts.
    #[must_use]
    pub fn grace_period(&self) -> chrono::TimeDelta {
        let days = self.grace_period_days.clamp(0, MAX_GRACE_PERIOD_DAYS);
        chrono::TimeDelta::try_days(days).unwrap_or_else(chrono::TimeDelta::zero)
    }
}
