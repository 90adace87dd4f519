//! Air-gap license files and revocation lists.
//!
//! A license file is a JSON envelope
//! `{"version": 1, "license": base64(json), "signature": base64}` where the
//! Ed25519 signature covers the decoded license JSON bytes. A revocation list
//! is `{"version": n, "hashes": [...], "signature": base64}` signed over the
//! compact JSON encoding of `{"version": n, "hashes": [...]}`. Each hash is
//! the lowercase SHA-256 hex of a license ID.

use crate::clock::Clock;
use crate::config::LicenseConfig;
use crate::device::HardwareFingerprint;
use crate::error::{LicenseError, LicenseResult};
use crate::license::{DowngradeReason, License, ValidationState};
use crate::store::EntitlementStore;
use crate::tier::{Feature, Tier, limits_for};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// The only envelope version understood.
pub const ENVELOPE_VERSION: u32 = 1;

/// A license validated entirely from a local signed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirGapLicense {
    pub id: String,
    #[serde(alias = "license_type")]
    pub tier: Tier,
    pub organization: String,
    #[serde(default)]
    pub email: String,
    /// Wire names of granted features.
    #[serde(default)]
    pub features: Vec<String>,
    /// Limit overrides on top of the tier defaults, keyed like entitlement
    /// limits (`agents` or `max_agents`).
    #[serde(default)]
    pub limits: BTreeMap<String, i64>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub air_gap_enabled: bool,
    /// Fingerprint of the machine this license is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
}

impl AirGapLicense {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Revocation-list hash of this license.
    #[must_use]
    pub fn revocation_hash(&self) -> String {
        revocation_hash(&self.id)
    }

    /// Converts to the store's license representation.
    pub fn to_license(&self) -> LicenseResult<License> {
        let limits = limits_for(self.tier)
            .with_overrides(&self.limits)
            .map_err(LicenseError::MalformedPayload)?;
        let mut features: BTreeSet<String> = self.features.iter().cloned().collect();
        if self.air_gap_enabled {
            features.insert(Feature::AirGap.as_str().to_string());
        }
        Ok(License {
            tier: self.tier,
            customer_id: self.id.clone(),
            customer_name: self.email.clone(),
            company: self.organization.clone(),
            issued_at: self.issued_at,
            expires_at: Some(self.expires_at),
            limits,
            is_trial: false,
            trial_duration_days: 0,
            trial_started_at: None,
            feature_overrides: Some(features),
        })
    }
}

/// Lowercase SHA-256 hex of a license ID.
#[must_use]
pub fn revocation_hash(license_id: &str) -> String {
    hex::encode(Sha256::digest(license_id.as_bytes()))
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    license: String,
    signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedRevocationList {
    version: u64,
    hashes: Vec<String>,
    signature: String,
}

/// The signed portion of a revocation list.
#[derive(Serialize)]
struct RevocationBody<'a> {
    version: u64,
    hashes: &'a [String],
}

/// Accepted revocation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationSet {
    pub version: u64,
    pub hashes: BTreeSet<String>,
}

impl RevocationSet {
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(&hash.to_ascii_lowercase())
    }
}

#[derive(Debug, Default)]
struct OfflineState {
    license: Option<AirGapLicense>,
    revocations: RevocationSet,
}

/// Validates air-gap license files and revocation lists without network
/// access.
#[derive(Debug)]
pub struct OfflineValidator {
    public_key: VerifyingKey,
    clock: Arc<dyn Clock>,
    fingerprint: Option<HardwareFingerprint>,
    license_path: Option<PathBuf>,
    revocation_path: Option<PathBuf>,
    store: Option<Arc<EntitlementStore>>,
    state: RwLock<OfflineState>,
}

impl OfflineValidator {
    pub fn new(public_key: VerifyingKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            public_key,
            clock,
            fingerprint: None,
            license_path: None,
            revocation_path: None,
            store: None,
            state: RwLock::new(OfflineState::default()),
        }
    }

    /// Builds a validator from configuration, loading any persisted
    /// revocation list.
    pub fn from_config(
        config: &LicenseConfig,
        store: Arc<EntitlementStore>,
        clock: Arc<dyn Clock>,
    ) -> LicenseResult<Self> {
        let mut validator = Self::new(config.entitlement_key()?, clock).with_store(store);
        validator.license_path = config.license_file.clone();
        validator.revocation_path = config.revocation_file.clone();
        validator.load_persisted_revocations()?;
        Ok(validator)
    }

    /// Publishes usable licenses to, and downgrades, this store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<EntitlementStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses this fingerprint instead of reading the machine's identifiers.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: HardwareFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    #[must_use]
    pub fn with_license_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.license_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_revocation_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.revocation_path = Some(path.into());
        self
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, OfflineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, OfflineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last license whose signature verified, including an expired one.
    #[must_use]
    pub fn current_license(&self) -> Option<AirGapLicense> {
        self.read_state().license.clone()
    }

    #[must_use]
    pub fn revocations(&self) -> RevocationSet {
        self.read_state().revocations.clone()
    }

    /// Returns true if a loaded license is currently usable.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        let now = self.clock.now();
        let state = self.read_state();
        state.license.as_ref().is_some_and(|license| {
            !license.is_expired_at(now) && !state.revocations.contains(&license.revocation_hash())
        })
    }

    /// Loads the configured license file.
    pub fn load(&self) -> LicenseResult<AirGapLicense> {
        let path = self
            .license_path
            .clone()
            .ok_or_else(|| LicenseError::NotFound("no air-gap license file configured".into()))?;
        self.load_license_file(&path)
    }

    /// Loads and validates a license file.
    ///
    /// Checks run in order: envelope, signature, payload, revocation,
    /// hardware binding, expiry. An expired license is still cached so status
    /// screens can show its details.
    pub fn load_license_file(&self, path: &Path) -> LicenseResult<AirGapLicense> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LicenseError::NotFound(path.display().to_string()),
            _ => LicenseError::Io(e),
        })?;
        self.load_license_bytes(&bytes)
    }

    /// Validates license file contents. See [`Self::load_license_file`].
    pub fn load_license_bytes(&self, bytes: &[u8]) -> LicenseResult<AirGapLicense> {
        let license = decode_license_file(bytes, &self.public_key)?;

        if self.read_state().revocations.contains(&license.revocation_hash()) {
            warn!(license_id = %license.id, "air-gap license is revoked");
            self.write_state().license = None;
            if let Some(store) = &self.store {
                store.downgrade(DowngradeReason::Revoked);
            }
            return Err(LicenseError::Revoked);
        }

        if let Some(bound) = &license.hardware_id {
            let fingerprint = match &self.fingerprint {
                Some(fp) => fp.clone(),
                None => HardwareFingerprint::current()?,
            };
            if !fingerprint.matches(bound) {
                warn!(license_id = %license.id, "air-gap license bound to another machine");
                self.write_state().license = None;
                return Err(LicenseError::HardwareMismatch);
            }
        }

        self.write_state().license = Some(license.clone());

        let now = self.clock.now();
        if license.is_expired_at(now) {
            warn!(license_id = %license.id, expires_at = %license.expires_at, "air-gap license expired");
            if let Some(store) = &self.store
                && store.license().customer_id == license.id
            {
                store.downgrade(DowngradeReason::Expired);
            }
            return Err(LicenseError::Expired(license.expires_at.to_rfc3339()));
        }

        if let Some(store) = &self.store {
            store.set_license(license.to_license()?, ValidationState::ActiveLocallyVerified);
        }
        info!(license_id = %license.id, tier = %license.tier, "air-gap license loaded");
        Ok(license)
    }

    /// Accepts a signed revocation list.
    ///
    /// If the loaded license is on the new list it is dropped, the store is
    /// downgraded, and `Revoked` is returned.
    pub fn update_revocation_list(&self, blob: &[u8]) -> LicenseResult<()> {
        let set = decode_revocation_list(blob, &self.public_key)?;
        let current_version = self.read_state().revocations.version;
        if set.version < current_version {
            return Err(LicenseError::MalformedEncoding(format!(
                "stale revocation list: version {} is older than {current_version}",
                set.version
            )));
        }

        if let Some(path) = &self.revocation_path {
            write_atomically(path, blob)?;
        }

        let version = set.version;
        let revoked = {
            let mut state = self.write_state();
            state.revocations = set;
            let hit = state
                .license
                .as_ref()
                .is_some_and(|l| state.revocations.contains(&l.revocation_hash()));
            if hit {
                state.license = None;
            }
            hit
        };
        info!(version, "revocation list updated");

        if revoked {
            warn!("loaded air-gap license revoked by list update");
            if let Some(store) = &self.store {
                store.downgrade(DowngradeReason::Revoked);
            }
            return Err(LicenseError::Revoked);
        }
        Ok(())
    }

    /// Replaces the configured license file with `raw`.
    ///
    /// The new file is staged, the old one backed up, and the new one
    /// installed and loaded. If it fails validation the backup is restored
    /// and reloaded, so a loadable file is never lost to a bad update.
    pub fn apply_new_license(&self, raw: &[u8]) -> LicenseResult<AirGapLicense> {
        let path = self
            .license_path
            .clone()
            .ok_or_else(|| LicenseError::NotFound("no air-gap license file configured".into()))?;
        let staged = path.with_extension("staged");
        let backup = path.with_extension("bak");

        std::fs::write(&staged, raw)
            .map_err(|e| LicenseError::Storage(format!("failed to stage license: {e}")))?;
        let had_previous = path.exists();
        if had_previous {
            std::fs::copy(&path, &backup)
                .map_err(|e| LicenseError::Storage(format!("failed to back up license: {e}")))?;
        }
        std::fs::rename(&staged, &path)
            .map_err(|e| LicenseError::Storage(format!("failed to install license: {e}")))?;

        match self.load_license_file(&path) {
            Ok(license) => {
                if had_previous {
                    let _ = std::fs::remove_file(&backup);
                }
                Ok(license)
            }
            Err(e) => {
                warn!(error = %e, "new air-gap license rejected, restoring previous file");
                if had_previous {
                    std::fs::rename(&backup, &path).map_err(|re| {
                        LicenseError::Storage(format!("failed to restore license backup: {re}"))
                    })?;
                    if let Err(reload) = self.load_license_file(&path) {
                        debug!(error = %reload, "restored license is not usable either");
                    }
                } else {
                    let _ = std::fs::remove_file(&path);
                    self.write_state().license = None;
                }
                Err(e)
            }
        }
    }

    fn load_persisted_revocations(&self) -> LicenseResult<()> {
        let Some(path) = &self.revocation_path else {
            return Ok(());
        };
        match std::fs::read(path) {
            Ok(blob) => {
                let set = decode_revocation_list(&blob, &self.public_key)?;
                debug!(version = set.version, entries = set.hashes.len(), "revocation list loaded");
                self.write_state().revocations = set;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Io(e)),
        }
    }
}

/// Decodes a license file envelope and verifies its signature.
///
/// Does not check revocation, hardware binding or expiry.
pub fn decode_license_file(bytes: &[u8], public_key: &VerifyingKey) -> LicenseResult<AirGapLicense> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(LicenseError::EmptyInput);
    }
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| LicenseError::MalformedEncoding(format!("invalid license envelope: {e}")))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(LicenseError::MalformedEncoding(format!(
            "unsupported license envelope version {}",
            envelope.version
        )));
    }
    let payload = STANDARD
        .decode(envelope.license.trim())
        .map_err(|e| LicenseError::MalformedEncoding(format!("invalid license base64: {e}")))?;
    let signature = decode_signature(&envelope.signature)?;

    public_key
        .verify(&payload, &signature)
        .map_err(|_| LicenseError::InvalidSignature)?;

    serde_json::from_slice(&payload)
        .map_err(|e| LicenseError::MalformedPayload(format!("invalid air-gap license: {e}")))
}

/// Decodes and verifies a signed revocation list.
pub fn decode_revocation_list(blob: &[u8], public_key: &VerifyingKey) -> LicenseResult<RevocationSet> {
    if blob.iter().all(u8::is_ascii_whitespace) {
        return Err(LicenseError::EmptyInput);
    }
    let list: SignedRevocationList = serde_json::from_slice(blob)
        .map_err(|e| LicenseError::MalformedEncoding(format!("invalid revocation list: {e}")))?;
    let signature = decode_signature(&list.signature)?;
    let body = serde_json::to_vec(&RevocationBody {
        version: list.version,
        hashes: &list.hashes,
    })?;
    public_key
        .verify(&body, &signature)
        .map_err(|_| LicenseError::InvalidSignature)?;

    Ok(RevocationSet {
        version: list.version,
        hashes: list.hashes.iter().map(|h| h.to_ascii_lowercase()).collect(),
    })
}

fn decode_signature(signature_b64: &str) -> LicenseResult<Signature> {
    let bytes = STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| LicenseError::MalformedEncoding(format!("invalid signature base64: {e}")))?;
    Signature::from_slice(&bytes)
        .map_err(|_| LicenseError::MalformedEncoding("signature must be 64 bytes".to_string()))
}

/// Produces a signed license file. Used by vendor tooling and tests.
pub fn sign_license_file(license: &AirGapLicense, signing_key: &SigningKey) -> LicenseResult<Vec<u8>> {
    let payload = serde_json::to_vec(license)?;
    let signature = signing_key.sign(&payload);
    let envelope = Envelope {
        version: ENVELOPE_VERSION,
        license: STANDARD.encode(&payload),
        signature: STANDARD.encode(signature.to_bytes()),
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Produces a signed revocation list. Used by vendor tooling and tests.
pub fn sign_revocation_list(
    version: u64,
    hashes: &[String],
    signing_key: &SigningKey,
) -> LicenseResult<Vec<u8>> {
    let body = serde_json::to_vec(&RevocationBody { version, hashes })?;
    let signature = signing_key.sign(&body);
    let list = SignedRevocationList {
        version,
        hashes: hashes.to_vec(),
        signature: STANDARD.encode(signature.to_bytes()),
    };
    Ok(serde_json::to_vec_pretty(&list)?)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> LicenseResult<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| LicenseError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| LicenseError::Storage(format!("failed to replace {}: {e}", path.display())))
}
