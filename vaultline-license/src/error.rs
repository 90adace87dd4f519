//! Error types for the licensing core.

use crate::tier::{Feature, Resource, Tier};
use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Key, token or file was empty.
    #[error("empty license input")]
    EmptyInput,

    /// Wrong segment count, undecodable base64 or a malformed envelope.
    #[error("malformed license encoding: {0}")]
    MalformedEncoding(String),

    /// Signature verification failed.
    #[error("license signature invalid")]
    InvalidSignature,

    /// Signature was valid but the signed payload could not be decoded.
    #[error("malformed license payload: {0}")]
    MalformedPayload(String),

    /// Tier name is not part of the tier policy.
    #[error("unknown license tier: {0}")]
    UnknownTier(String),

    /// No license material at the given location.
    #[error("license not found: {0}")]
    NotFound(String),

    /// License has expired.
    #[error("license expired on {0}")]
    Expired(String),

    /// License id is on the revocation list, or the server reports it revoked.
    #[error("license has been revoked")]
    Revoked,

    /// The current tier does not include the feature.
    #[error("feature '{feature}' is not licensed (requires {required} tier)")]
    FeatureNotLicensed { feature: Feature, required: Tier },

    /// Admission would exceed the tier's limit for a resource.
    #[error("{resource} limit reached ({current} of {limit})")]
    LimitExceeded {
        resource: Resource,
        limit: u64,
        current: u64,
    },

    /// License is bound to different hardware.
    #[error("license is bound to a different machine")]
    HardwareMismatch,

    /// No stable machine identifier could be read.
    #[error("no hardware identifiers available for fingerprinting")]
    HardwareUnavailable,

    /// Licensing server unreachable, timed out or returned garbage.
    #[error("licensing server unavailable: {0}")]
    NetworkUnavailable(String),

    /// The licensing server refused the key (unknown, deactivated).
    #[error("license key rejected by licensing server: {0}")]
    Rejected(String),

    /// A remote kill instruction is in effect until a new key is submitted.
    #[error("license disabled by remote kill switch")]
    Killed,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configured public key or secret is unusable.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// A resource-counting collaborator failed.
    #[error("resource count failed: {0}")]
    Counting(String),

    /// Settings or license file persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true for errors that should be shown to the user as an upgrade
    /// prompt rather than logged as a system failure.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::LimitExceeded { .. } | Self::FeatureNotLicensed { .. }
        )
    }

    /// Returns true if this error came from the network path.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    /// Returns an actionable message for user-facing errors.
    #[must_use]
    pub fn upgrade_hint(&self) -> Option<String> {
        match self {
            Self::FeatureNotLicensed { feature, required } => Some(format!(
                "{} is available on the {} plan. Upgrade to enable it.",
                feature.description(),
                required.display_name()
            )),
            Self::LimitExceeded {
                resource, limit, ..
            } => Some(format!(
                "Your plan allows {limit} {resource}. Upgrade to add more."
            )),
            _ => None,
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
