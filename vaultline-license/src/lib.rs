//! Licensing core for Vaultline.
//!
//! Decides which tier and features an installed server may use, and enforces
//! the tier's resource limits.
//!
//! - **Codec**: license keys and entitlement tokens, HMAC-SHA256 or Ed25519
//! - **Tier policy**: static limits and feature sets per tier
//! - **Offline validator**: air-gap license files and revocation lists
//! - **Entitlement store**: the single, lock-guarded view of the current license
//! - **Phone-home validator**: activation, periodic validation, heartbeats,
//!   grace period and kill switch
//! - **Limit enforcer**: admission checks and feature gates
//!
//! # Key Format
//!
//! Keys and tokens are `base64url(payload).base64url(signature)`. The payload
//! is JSON; the signature covers the base64url payload text.
//!
//! # Degradation
//!
//! The platform never stops on a licensing failure. Revocation, expiry and an
//! exhausted grace period all fall back to the free tier.

mod client;
mod clock;
mod codec;
mod config;
mod counter;
mod device;
mod enforcer;
mod error;
mod ids;
mod license;
mod offline;
mod settings;
mod store;
mod tier;
mod validator;

pub use client::{
    ActivateRequest, DeactivateRequest, HeartbeatRequest, HeartbeatResponse, LicenseResponse,
    LicenseServerClient, LicenseStatusCode, RegisterRequest, RegisterResponse, RemoteAction,
    ValidateRequest,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{
    ENTITLEMENT_PUBLIC_KEY, Entitlement, EntitlementClaims, KeySigner, KeyVerifier,
    LICENSE_PUBLIC_KEY, LicenseClaims, SigningScheme, issue_entitlement_token, issue_license_key,
    parse_public_key_hex, verify_entitlement_token, verify_license_key,
};
pub use config::{LicenseConfig, MAX_GRACE_PERIOD_DAYS};
pub use counter::{ResourceCounter, UsageMetrics};
pub use device::{DeviceInfo, HardwareFingerprint, MachineIdentifier};
pub use enforcer::{LimitEnforcer, ResourceUsage, UsageReport};
pub use error::{LicenseError, LicenseResult};
pub use ids::{InstanceId, OrganizationId};
pub use license::{DowngradeReason, License, LicenseStatus, ValidationState};
pub use offline::{
    AirGapLicense, ENVELOPE_VERSION, OfflineValidator, RevocationSet, decode_license_file,
    decode_revocation_list, revocation_hash, sign_license_file, sign_revocation_list,
};
pub use settings::{FileSettingsStore, InMemorySettings, PersistedSettings, SettingsStore};
pub use store::{DEFAULT_GRACE_PERIOD_DAYS, EntitlementStore};
pub use tier::{
    Feature, Limit, Resource, Tier, TierLimits, UNLIMITED, compare, features_for,
    features_for_name, is_monotonic, limits_for, limits_for_name, required_tier,
    required_tier_for_name, tier_has_feature,
};
pub use validator::PhoneHomeValidator;
