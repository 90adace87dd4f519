//! License key and entitlement token verification.
//!
//! Both use the format `base64url(payload).base64url(signature)`. The
//! signature covers `payload_b64.as_bytes()` (the base64url-encoded payload
//! string, not the decoded JSON), so verification always happens before the
//! payload is decoded.
//!
//! License keys are signed with one of two schemes, chosen by configuration:
//! - `hmac`: HMAC-SHA256 with a shared secret held by vendor tooling
//! - `ed25519`: Ed25519, verifiable with the embedded public key
//!
//! Entitlement tokens are always Ed25519.

use crate::error::{LicenseError, LicenseResult};
use crate::tier::{Feature, Tier, TierLimits, limits_for};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Embedded Ed25519 public key for license key verification (32 bytes).
pub const LICENSE_PUBLIC_KEY: [u8; 32] = [
    87, 140, 26, 126, 232, 57, 107, 126, 48, 93, 8, 55, 130, 206, 122, 244, 227, 102, 145, 73,
    202, 64, 215, 39, 17, 27, 135, 177, 56, 223, 225, 112,
];

/// Embedded Ed25519 public key for entitlement token verification (32 bytes).
pub const ENTITLEMENT_PUBLIC_KEY: [u8; 32] = [
    6, 32, 179, 145, 154, 4, 203, 166, 248, 92, 80, 0, 73, 104, 172, 211, 22, 184, 233, 60, 246,
    251, 208, 182, 74, 0, 119, 130, 211, 131, 204, 42,
];

/// Which signature scheme license keys are verified with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningScheme {
    Hmac,
    #[default]
    Ed25519,
}

/// Verification strategy for signed keys and tokens.
#[derive(Clone)]
pub enum KeyVerifier {
    Hmac(Vec<u8>),
    Ed25519(VerifyingKey),
}

impl KeyVerifier {
    /// Creates an HMAC-SHA256 verifier from a shared secret.
    pub fn hmac(secret: impl AsRef<[u8]>) -> LicenseResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(LicenseError::InvalidKeyMaterial(
                "HMAC secret must not be empty".to_string(),
            ));
        }
        Ok(Self::Hmac(secret.to_vec()))
    }

    /// Creates an Ed25519 verifier from raw public key bytes.
    pub fn ed25519(public_key: &[u8; 32]) -> LicenseResult<Self> {
        VerifyingKey::from_bytes(public_key)
            .map(Self::Ed25519)
            .map_err(|_| LicenseError::InvalidKeyMaterial("invalid Ed25519 public key".to_string()))
    }

    /// Creates an Ed25519 verifier from a hex-encoded public key.
    pub fn ed25519_hex(public_key_hex: &str) -> LicenseResult<Self> {
        parse_public_key_hex(public_key_hex).map(Self::Ed25519)
    }

    /// The verifier for the embedded license public key.
    pub fn embedded_license_key() -> LicenseResult<Self> {
        Self::ed25519(&LICENSE_PUBLIC_KEY)
    }

    #[must_use]
    pub fn scheme(&self) -> SigningScheme {
        match self {
            Self::Hmac(_) => SigningScheme::Hmac,
            Self::Ed25519(_) => SigningScheme::Ed25519,
        }
    }

    /// Checks `signature` over `message`.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Hmac(secret) => {
                let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                    return false;
                };
                mac.update(message);
                mac.verify_slice(signature).is_ok()
            }
            Self::Ed25519(key) => Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false),
        }
    }
}

impl fmt::Debug for KeyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac(_) => f.write_str("KeyVerifier::Hmac(<redacted>)"),
            Self::Ed25519(key) => write!(f, "KeyVerifier::Ed25519({})", hex::encode(key.as_bytes())),
        }
    }
}

/// Parses a hex-encoded Ed25519 public key.
pub fn parse_public_key_hex(public_key_hex: &str) -> LicenseResult<VerifyingKey> {
    let bytes = hex::decode(public_key_hex.trim()).map_err(|e| {
        LicenseError::InvalidKeyMaterial(format!("public key is not valid hex: {e}"))
    })?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LicenseError::InvalidKeyMaterial("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| LicenseError::InvalidKeyMaterial("invalid Ed25519 public key".to_string()))
}

/// Signing counterpart of [`KeyVerifier`], used by vendor tooling and tests.
#[derive(Clone)]
pub enum KeySigner {
    Hmac(Vec<u8>),
    Ed25519(SigningKey),
}

impl KeySigner {
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Hmac(secret) => {
                // HMAC accepts keys of any length.
                let mut mac = match HmacSha256::new_from_slice(secret) {
                    Ok(mac) => mac,
                    Err(_) => return Vec::new(),
                };
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Returns the verifier that accepts this signer's output.
    #[must_use]
    pub fn verifier(&self) -> KeyVerifier {
        match self {
            Self::Hmac(secret) => KeyVerifier::Hmac(secret.clone()),
            Self::Ed25519(key) => KeyVerifier::Ed25519(key.verifying_key()),
        }
    }
}

impl fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac(_) => f.write_str("KeySigner::Hmac(<redacted>)"),
            Self::Ed25519(_) => f.write_str("KeySigner::Ed25519(<redacted>)"),
        }
    }
}

/// Claims carried by a license key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseClaims {
    pub tier: Tier,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub company: String,
    /// Issued-at (seconds since epoch).
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expires-at (seconds since epoch).
    #[serde(rename = "exp")]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trial: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub trial_days: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl LicenseClaims {
    #[must_use]
    pub fn issued_at_time(&self) -> DateTime<Utc> {
        timestamp(self.issued_at)
    }

    #[must_use]
    pub fn expires_at_time(&self) -> DateTime<Utc> {
        timestamp(self.expires_at)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at
    }
}

/// Wire form of [`LicenseClaims`]; the tier stays a string until checked
/// against the tier policy.
#[derive(Deserialize)]
struct RawLicenseClaims {
    tier: String,
    customer_id: String,
    #[serde(default)]
    customer_name: String,
    #[serde(default)]
    company: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    trial: bool,
    #[serde(default)]
    trial_days: u32,
}

/// Claims carried by an entitlement token, as sent by the licensing server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementClaims {
    pub tier: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Limits keyed by resource name; `agents` and `max_agents` are both
    /// accepted.
    #[serde(default)]
    pub limits: BTreeMap<String, i64>,
    pub nonce: String,
    pub iat: i64,
    pub exp: i64,
}

/// A verified, time-boxed grant from the licensing server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub tier: Tier,
    pub features: BTreeSet<String>,
    pub limits: TierLimits,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Entitlement {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(feature.as_str())
    }
}

/// Verifies a license key and returns its claims.
///
/// Expiry is not checked here; callers decide between active, grace and
/// downgraded.
pub fn verify_license_key(key: &str, verifier: &KeyVerifier) -> LicenseResult<LicenseClaims> {
    let payload = verify_segments(key, verifier)?;

    let raw: RawLicenseClaims = serde_json::from_slice(&payload)
        .map_err(|e| LicenseError::MalformedPayload(format!("invalid claims JSON: {e}")))?;

    let tier = Tier::parse(&raw.tier).ok_or_else(|| LicenseError::UnknownTier(raw.tier.clone()))?;
    if raw.customer_id.trim().is_empty() {
        return Err(LicenseError::MalformedPayload(
            "customer_id must not be empty".to_string(),
        ));
    }
    if raw.exp < raw.iat {
        return Err(LicenseError::MalformedPayload(
            "expires_at precedes issued_at".to_string(),
        ));
    }

    Ok(LicenseClaims {
        tier,
        customer_id: raw.customer_id,
        customer_name: raw.customer_name,
        company: raw.company,
        issued_at: raw.iat,
        expires_at: raw.exp,
        trial: raw.trial,
        trial_days: raw.trial_days,
    })
}

/// Verifies an entitlement token against an Ed25519 public key.
pub fn verify_entitlement_token(
    token: &str,
    public_key: &VerifyingKey,
) -> LicenseResult<Entitlement> {
    let verifier = KeyVerifier::Ed25519(*public_key);
    let payload = verify_segments(token, &verifier)?;

    let claims: EntitlementClaims = serde_json::from_slice(&payload)
        .map_err(|e| LicenseError::MalformedPayload(format!("invalid entitlement JSON: {e}")))?;

    let tier =
        Tier::parse(&claims.tier).ok_or_else(|| LicenseError::UnknownTier(claims.tier.clone()))?;
    if claims.exp < claims.iat {
        return Err(LicenseError::MalformedPayload(
            "expires_at precedes issued_at".to_string(),
        ));
    }
    let limits = limits_for(tier)
        .with_overrides(&claims.limits)
        .map_err(LicenseError::MalformedPayload)?;

    Ok(Entitlement {
        tier,
        features: claims.features.into_iter().collect(),
        limits,
        nonce: claims.nonce,
        issued_at: timestamp(claims.iat),
        expires_at: timestamp(claims.exp),
    })
}

/// Produces a signed license key. Used by vendor tooling and tests.
pub fn issue_license_key(claims: &LicenseClaims, signer: &KeySigner) -> LicenseResult<String> {
    let payload = serde_json::to_vec(claims)?;
    Ok(sign_payload(&payload, signer))
}

/// Produces a signed entitlement token. Used by vendor tooling and tests.
pub fn issue_entitlement_token(
    claims: &EntitlementClaims,
    signing_key: &SigningKey,
) -> LicenseResult<String> {
    let payload = serde_json::to_vec(claims)?;
    Ok(sign_payload(&payload, &KeySigner::Ed25519(signing_key.clone())))
}

fn sign_payload(payload: &[u8], signer: &KeySigner) -> String {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let signature = signer.sign(payload_b64.as_bytes());
    format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(signature))
}

/// Splits, verifies and decodes a two-segment signed string, returning the
/// decoded payload bytes.
fn verify_segments(input: &str, verifier: &KeyVerifier) -> LicenseResult<Vec<u8>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(LicenseError::EmptyInput);
    }

    let parts: Vec<&str> = input.split('.').collect();
    if parts.len() != 2 {
        return Err(LicenseError::MalformedEncoding(format!(
            "expected two dot-separated segments, found {}",
            parts.len()
        )));
    }
    let (payload_b64, signature_b64) = (parts[0], parts[1]);
    if payload_b64.is_empty() || signature_b64.is_empty() {
        return Err(LicenseError::MalformedEncoding("empty segment".to_string()));
    }

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|e| {
        LicenseError::MalformedEncoding(format!("invalid signature base64: {e}"))
    })?;

    if !verifier.verify(payload_b64.as_bytes(), &signature) {
        return Err(LicenseError::InvalidSignature);
    }

    URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| LicenseError::MalformedEncoding(format!("invalid payload base64: {e}")))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
