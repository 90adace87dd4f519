//! The locally held license and the validation state machine's states.

use crate::codec::LicenseClaims;
use crate::tier::{Tier, TierLimits, limits_for};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The locally held belief about the subscription.
///
/// Replaced wholesale on every activation, validation or downgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub tier: Tier,
    pub customer_id: String,
    pub customer_name: String,
    pub company: String,
    pub issued_at: DateTime<Utc>,
    /// `None` for the free-tier default, which never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub limits: TierLimits,
    pub is_trial: bool,
    pub trial_duration_days: u32,
    pub trial_started_at: Option<DateTime<Utc>>,
    /// Explicit feature list from an air-gap license file or the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_overrides: Option<BTreeSet<String>>,
}

impl License {
    /// The free-tier default every process starts with.
    #[must_use]
    pub fn free() -> Self {
        Self {
            tier: Tier::Free,
            customer_id: String::new(),
            customer_name: String::new(),
            company: String::new(),
            issued_at: DateTime::<Utc>::UNIX_EPOCH,
            expires_at: None,
            limits: limits_for(Tier::Free),
            is_trial: false,
            trial_duration_days: 0,
            trial_started_at: None,
            feature_overrides: None,
        }
    }

    /// Builds a license from verified key claims, with tier-derived limits.
    #[must_use]
    pub fn from_claims(claims: &LicenseClaims) -> Self {
        let issued_at = claims.issued_at_time();
        Self {
            tier: claims.tier,
            customer_id: claims.customer_id.clone(),
            customer_name: claims.customer_name.clone(),
            company: claims.company.clone(),
            issued_at,
            expires_at: Some(claims.expires_at_time()),
            limits: limits_for(claims.tier),
            is_trial: claims.trial,
            trial_duration_days: claims.trial_days,
            trial_started_at: claims.trial.then_some(issued_at),
            feature_overrides: None,
        }
    }

    #[must_use]
    pub fn is_free_default(&self) -> bool {
        self.tier == Tier::Free && self.customer_id.is_empty()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Days left on a trial, or `None` if this is not a trial.
    #[must_use]
    pub fn trial_days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.is_trial {
            return None;
        }
        let started = self.trial_started_at.unwrap_or(self.issued_at);
        let ends = started + Duration::days(i64::from(self.trial_duration_days));
        Some((ends - now).num_days().max(0))
    }
}

impl Default for License {
    fn default() -> Self {
        Self::free()
    }
}

/// States of the phone-home validation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// No license key configured.
    Unlicensed,
    /// A key was submitted and activation is in flight.
    Activating,
    /// Confirmed by the licensing server.
    Active,
    /// Server unreachable; the stored key verifies locally and has not expired.
    ActiveLocallyVerified,
    /// Key expired or server unreachable, but still inside the grace window.
    GracePeriod,
    /// Running on the free tier after revocation, expiry or remote instruction.
    Downgraded,
    /// Remote kill switch received; cleared only by submitting a new key.
    Killed,
}

impl ValidationState {
    /// Returns true if paid-tier privileges currently apply.
    #[must_use]
    pub fn grants_privileges(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::ActiveLocallyVerified | Self::GracePeriod
        )
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unlicensed => "unlicensed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::ActiveLocallyVerified => "active (locally verified)",
            Self::GracePeriod => "grace period",
            Self::Downgraded => "downgraded",
            Self::Killed => "killed",
        })
    }
}

/// Why the instance fell back to the free tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradeReason {
    Revoked,
    Expired,
    GraceExhausted,
    RemoteDowngrade,
    InvalidKey,
    Deactivated,
}

/// Point-in-time license report for status and renewal screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseStatus {
    pub state: ValidationState,
    pub tier: Tier,
    pub customer_name: String,
    pub company: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub trial_days_remaining: Option<i64>,
    /// Whole seconds of grace left, when a grace window is running.
    pub grace_remaining_secs: Option<i64>,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub killed: bool,
    pub downgrade_reason: Option<DowngradeReason>,
    pub has_entitlement: bool,
}
