//! The entitlement store: the single source of truth for the current license.
//!
//! All mutable licensing state sits behind one reader/writer lock. Readers
//! get owned snapshots, never references into the guarded state, and every
//! write replaces whole `License`/`Entitlement` values.

use crate::codec::Entitlement;
use crate::config::LicenseConfig;
use crate::ids::InstanceId;
use crate::license::{DowngradeReason, License, LicenseStatus, ValidationState};
use crate::tier::{Feature, Tier, TierLimits, features_for};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Default grace window.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone)]
struct ValidatorState {
    license: License,
    entitlement: Option<Entitlement>,
    entitlement_token: Option<String>,
    license_key: Option<String>,
    instance_id: Option<InstanceId>,
    state: ValidationState,
    grace_started_at: Option<DateTime<Utc>>,
    last_validated_at: Option<DateTime<Utc>>,
    killed: bool,
    downgrade_reason: Option<DowngradeReason>,
    feature_usage: BTreeSet<Feature>,
}

impl Default for ValidatorState {
    fn default() -> Self {
        Self {
            license: License::free(),
            entitlement: None,
            entitlement_token: None,
            license_key: None,
            instance_id: None,
            state: ValidationState::Unlicensed,
            grace_started_at: None,
            last_validated_at: None,
            killed: false,
            downgrade_reason: None,
            feature_usage: BTreeSet::new(),
        }
    }
}

/// Concurrency-guarded holder of the current license and entitlement.
#[derive(Debug)]
pub struct EntitlementStore {
    inner: RwLock<ValidatorState>,
    grace_period: Duration,
}

impl EntitlementStore {
    /// Creates a store holding the free-tier default.
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace_period(Duration::days(DEFAULT_GRACE_PERIOD_DAYS))
    }

    /// Creates a store using the configured grace window.
    #[must_use]
    pub fn from_config(config: &LicenseConfig) -> Self {
        Self::with_grace_period(config.grace_period())
    }

    #[must_use]
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            inner: RwLock::new(ValidatorState::default()),
            grace_period,
        }
    }

    // Writers always leave the state whole, so a poisoned lock still holds a
    // consistent value.
    fn read(&self) -> RwLockReadGuard<'_, ValidatorState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ValidatorState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reads ────────────────────────────────────────────────────

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    #[must_use]
    pub fn license(&self) -> License {
        self.read().license.clone()
    }

    #[must_use]
    pub fn entitlement(&self) -> Option<Entitlement> {
        self.read().entitlement.clone()
    }

    #[must_use]
    pub fn entitlement_token(&self) -> Option<String> {
        self.read().entitlement_token.clone()
    }

    #[must_use]
    pub fn license_key(&self) -> Option<String> {
        self.read().license_key.clone()
    }

    #[must_use]
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.read().instance_id
    }

    #[must_use]
    pub fn state(&self) -> ValidationState {
        self.read().state
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.read().killed
    }

    #[must_use]
    pub fn grace_started_at(&self) -> Option<DateTime<Utc>> {
        self.read().grace_started_at
    }

    #[must_use]
    pub fn last_validated_at(&self) -> Option<DateTime<Utc>> {
        self.read().last_validated_at
    }

    #[must_use]
    pub fn downgrade_reason(&self) -> Option<DowngradeReason> {
        self.read().downgrade_reason
    }

    /// Grace left at `now`, or `None` when no grace window is running.
    /// Never negative.
    #[must_use]
    pub fn grace_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.read().grace_started_at?;
        Some(self.remaining_from(started, now))
    }

    fn remaining_from(&self, started: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let ends = started
            .checked_add_signed(self.grace_period)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (ends - now).max(Duration::zero())
    }

    /// The tier whose privileges currently apply.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.read().license.tier
    }

    /// Feature names currently granted.
    ///
    /// An unexpired entitlement wins over an air-gap feature list, which wins
    /// over the tier policy.
    #[must_use]
    pub fn effective_features(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        let state = self.read();
        if let Some(entitlement) = state
            .entitlement
            .as_ref()
            .filter(|e| !e.is_expired_at(now))
        {
            return entitlement.features.clone();
        }
        if let Some(overrides) = &state.license.feature_overrides {
            return overrides.clone();
        }
        features_for(state.license.tier)
            .into_iter()
            .map(|f| f.as_str().to_string())
            .collect()
    }

    /// Limits currently in force; an unexpired entitlement wins over the
    /// license.
    #[must_use]
    pub fn effective_limits(&self, now: DateTime<Utc>) -> TierLimits {
        let state = self.read();
        state
            .entitlement
            .as_ref()
            .filter(|e| !e.is_expired_at(now))
            .map_or(state.license.limits, |e| e.limits)
    }

    /// Snapshot for status and renewal screens.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> LicenseStatus {
        let state = self.read();
        LicenseStatus {
            state: state.state,
            tier: state.license.tier,
            customer_name: state.license.customer_name.clone(),
            company: state.license.company.clone(),
            expires_at: state.license.expires_at,
            is_trial: state.license.is_trial,
            trial_days_remaining: state.license.trial_days_remaining(now),
            grace_remaining_secs: state
                .grace_started_at
                .map(|started| self.remaining_from(started, now).num_seconds()),
            last_validated_at: state.last_validated_at,
            killed: state.killed,
            downgrade_reason: state.downgrade_reason,
            has_entitlement: state
                .entitlement
                .as_ref()
                .is_some_and(|e| !e.is_expired_at(now)),
        }
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Replaces the license and moves to `new_state`.
    pub fn set_license(&self, license: License, new_state: ValidationState) {
        let mut state = self.write();
        debug!(tier = %license.tier, state = ?new_state, "license replaced");
        state.license = license;
        state.state = new_state;
        if new_state.grants_privileges() {
            state.downgrade_reason = None;
        }
    }

    /// Stores a verified entitlement together with its raw token.
    ///
    /// Ignored while the kill switch is in effect. Returns whether the
    /// entitlement was stored.
    pub fn set_entitlement(&self, entitlement: Entitlement, token: String) -> bool {
        let mut state = self.write();
        if state.killed {
            debug!(tier = %entitlement.tier, "entitlement ignored: kill switch in effect");
            return false;
        }
        state.entitlement = Some(entitlement);
        state.entitlement_token = Some(token);
        true
    }

    /// Drops the entitlement and its token once expired at `now`. Returns
    /// true if one was dropped.
    pub fn discard_expired_entitlement(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.write();
        if !state.entitlement.as_ref().is_some_and(|e| e.is_expired_at(now)) {
            return false;
        }
        if let Some(expired) = state.entitlement.take() {
            info!(tier = %expired.tier, expired_at = %expired.expires_at, "expired entitlement discarded");
        }
        state.entitlement_token = None;
        true
    }

    pub fn clear_entitlement(&self) {
        let mut state = self.write();
        state.entitlement = None;
        state.entitlement_token = None;
    }

    pub fn set_license_key(&self, key: Option<String>) {
        self.write().license_key = key;
    }

    pub fn set_instance_id(&self, id: InstanceId) {
        self.write().instance_id = Some(id);
    }

    pub fn set_state(&self, new_state: ValidationState) {
        self.write().state = new_state;
    }

    /// Starts the grace window at `at` unless one is already running from an
    /// earlier instant. Returns the effective start.
    pub fn begin_grace(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let mut state = self.write();
        match state.grace_started_at {
            Some(started) if started <= at => started,
            _ => {
                info!(started_at = %at, "grace period started");
                state.grace_started_at = Some(at);
                at
            }
        }
    }

    pub fn end_grace(&self) {
        self.write().grace_started_at = None;
    }

    pub fn mark_validated(&self, at: DateTime<Utc>) {
        self.write().last_validated_at = Some(at);
    }

    /// Drops to the free tier, discarding any entitlement. The license key is
    /// kept so a later validation can restore the paid tier.
    pub fn downgrade(&self, reason: DowngradeReason) {
        let mut state = self.write();
        warn!(reason = ?reason, from = %state.license.tier, "license downgraded to free tier");
        state.license = License::free();
        state.entitlement = None;
        state.entitlement_token = None;
        state.grace_started_at = None;
        state.state = ValidationState::Downgraded;
        state.downgrade_reason = Some(reason);
    }

    /// Applies the remote kill switch: clears the license, entitlement and
    /// key, and sets the sticky kill flag.
    pub fn kill(&self) {
        let mut state = self.write();
        warn!(from = %state.license.tier, "remote kill switch applied");
        state.license = License::free();
        state.entitlement = None;
        state.entitlement_token = None;
        state.license_key = None;
        state.grace_started_at = None;
        state.state = ValidationState::Killed;
        state.killed = true;
    }

    /// Lifts the kill flag ahead of a new key submission.
    pub fn clear_kill(&self) {
        let mut state = self.write();
        state.killed = false;
        if state.state == ValidationState::Killed {
            state.state = ValidationState::Unlicensed;
        }
    }

    /// Returns to the unlicensed free-tier default, keeping the instance ID.
    pub fn reset(&self) {
        let mut state = self.write();
        let instance_id = state.instance_id;
        *state = ValidatorState {
            instance_id,
            ..ValidatorState::default()
        };
    }

    /// Notes that a gated feature was exercised.
    pub fn record_feature_use(&self, feature: Feature) {
        self.write().feature_usage.insert(feature);
    }

    /// Reads and clears the feature-usage accumulator in one step.
    pub fn take_feature_usage(&self) -> BTreeSet<Feature> {
        std::mem::take(&mut self.write().feature_usage)
    }

    /// Merges usage back after a failed heartbeat.
    pub fn restore_feature_usage(&self, features: BTreeSet<Feature>) {
        self.write().feature_usage.extend(features);
    }
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}
