//! Phone-home validation state machine.
//!
//! ```text
//! Unlicensed -> Activating -> Active <-> ActiveLocallyVerified
//!                               |              |
//!                               v              v
//!                           Downgraded <- GracePeriod
//!
//! any state --kill--> Killed (until a new key is submitted)
//! ```
//!
//! Grace starts the first time the server cannot be reached while a key that
//! verifies locally is held, or at the key's expiry if that is earlier. It is
//! never restarted by later failures. A server-confirmed `expired` or `revoked`
//! downgrades immediately; grace only covers unreachability.
//!
//! Store writes happen only after a network round trip completes, so the
//! store lock is never held across a request.

use crate::client::{
    ActivateRequest, DeactivateRequest, HeartbeatRequest, LicenseResponse, LicenseServerClient,
    LicenseStatusCode, RegisterRequest, RemoteAction, ValidateRequest,
};
use crate::clock::Clock;
use crate::codec::{KeyVerifier, verify_entitlement_token, verify_license_key};
use crate::config::LicenseConfig;
use crate::counter::{ResourceCounter, UsageMetrics};
use crate::device::{DeviceInfo, HardwareFingerprint};
use crate::error::{LicenseError, LicenseResult};
use crate::ids::InstanceId;
use crate::license::{DowngradeReason, License, LicenseStatus, ValidationState};
use crate::settings::{PersistedSettings, SettingsStore};
use crate::store::EntitlementStore;
use crate::tier::{Feature, Tier, limits_for};
use chrono::Duration;
use ed25519_dalek::VerifyingKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drives activation, periodic validation and heartbeats against the
/// licensing server, and writes the outcome to the [`EntitlementStore`].
pub struct PhoneHomeValidator {
    config: LicenseConfig,
    client: LicenseServerClient,
    verifier: KeyVerifier,
    entitlement_key: VerifyingKey,
    store: Arc<EntitlementStore>,
    settings: Arc<dyn SettingsStore>,
    counter: Arc<dyn ResourceCounter>,
    clock: Arc<dyn Clock>,
    instance_id: InstanceId,
    hardware_id: Option<String>,
    registered: AtomicBool,
    running: AtomicBool,
    // Held across the whole of `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
    shutdown: Mutex<watch::Sender<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PhoneHomeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoneHomeValidator")
            .field("server_url", &self.config.server_url)
            .field("instance_id", &self.instance_id)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PhoneHomeValidator {
    /// Creates a validator, reading the persisted instance ID and license key.
    ///
    /// A missing instance ID is generated and persisted.
    pub fn new(
        config: LicenseConfig,
        store: Arc<EntitlementStore>,
        settings: Arc<dyn SettingsStore>,
        counter: Arc<dyn ResourceCounter>,
        clock: Arc<dyn Clock>,
    ) -> LicenseResult<Self> {
        config.validate()?;
        let client = LicenseServerClient::from_config(&config)?;
        let verifier = config.license_verifier()?;
        let entitlement_key = config.entitlement_key()?;

        let mut persisted = settings.load()?;
        let instance_id = match persisted.instance_id {
            Some(id) => id,
            None => {
                let id = InstanceId::new();
                persisted.instance_id = Some(id);
                settings.save(&persisted)?;
                info!(instance_id = %id, "generated instance id");
                id
            }
        };
        store.set_instance_id(instance_id);
        if persisted.license_key.is_some() {
            store.set_license_key(persisted.license_key);
        }

        let hardware_id = match HardwareFingerprint::current() {
            Ok(fp) => Some(fp.id().to_string()),
            Err(e) => {
                debug!(error = %e, "no hardware fingerprint for activation");
                None
            }
        };

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            client,
            verifier,
            entitlement_key,
            store,
            settings,
            counter,
            clock,
            instance_id,
            hardware_id,
            registered: AtomicBool::new(false),
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            shutdown: Mutex::new(shutdown),
            tasks: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EntitlementStore> {
        &self.store
    }

    #[must_use]
    pub fn status(&self) -> LicenseStatus {
        let now = self.clock.now();
        self.store.discard_expired_entitlement(now);
        self.store.status(now)
    }

    /// Grace left, when a grace window is running.
    #[must_use]
    pub fn grace_remaining(&self) -> Option<Duration> {
        self.store.grace_remaining(self.clock.now())
    }

    /// Notes a gated feature use for the next heartbeat.
    pub fn record_feature_use(&self, feature: Feature) {
        self.store.record_feature_use(feature);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Operations ───────────────────────────────────────────────

    /// Registers this instance with the licensing server, once per process.
    pub async fn register_instance(&self) -> LicenseResult<()> {
        if self.registered.load(Ordering::SeqCst) {
            return Ok(());
        }
        let device = DeviceInfo::collect();
        let request = RegisterRequest {
            instance_id: self.instance_id,
            product_version: self.config.product_version.clone(),
            os: device.os_name,
            os_version: device.os_version,
            arch: device.arch,
            tier: self.store.tier(),
            usage: UsageMetrics::collect(self.counter.as_ref()),
        };
        let response = self.client.register(&request).await?;
        self.registered.store(true, Ordering::SeqCst);
        info!(instance_id = %self.instance_id, status = %response.status, "instance registered");
        Ok(())
    }

    /// Submits a license key.
    ///
    /// If the server cannot be reached the key is verified locally instead.
    /// The key is persisted once accepted either way. A key other than the
    /// stored one that the server refuses leaves the current license as it
    /// was.
    pub async fn activate_license(&self, key: &str) -> LicenseResult<ValidationState> {
        if self.store.is_killed() {
            return Err(LicenseError::Killed);
        }
        let key = key.trim();
        if key.is_empty() {
            return Err(LicenseError::EmptyInput);
        }

        let previous = self.store.state();
        self.store.set_state(ValidationState::Activating);

        let request = ActivateRequest {
            license_key: key.to_string(),
            instance_id: self.instance_id,
            hardware_id: self.hardware_id.clone(),
            product_version: self.config.product_version.clone(),
        };
        let outcome = match known_status(self.client.activate(&request).await) {
            Ok(response)
                if response.status != LicenseStatusCode::Active
                    && self.store.license_key().as_deref() != Some(key) =>
            {
                warn!(
                    status = ?response.status,
                    reason = response.message.as_deref().unwrap_or_default(),
                    "submitted license key refused, current license kept"
                );
                Err(refusal_error(response.status))
            }
            Ok(response) => self.apply_license_response(key, &response),
            Err(e) if e.is_network() => {
                warn!(error = %e, "licensing server unreachable, verifying key locally");
                if previous == ValidationState::Downgraded
                    && self.store.license_key().as_deref() == Some(key)
                {
                    Ok(ValidationState::Downgraded)
                } else {
                    verify_license_key(key, &self.verifier).map(|_| self.verify_locally(key))
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(state) if state.grants_privileges() => {
                self.store.set_license_key(Some(key.to_string()));
                self.persist_license_key(Some(key.to_string()));
                info!(tier = %self.store.tier(), state = %state, "license activated");
                Ok(state)
            }
            Ok(_) => Err(self.rejection_error()),
            Err(e) => {
                if self.store.state() == ValidationState::Activating {
                    self.store.set_state(previous);
                }
                Err(e)
            }
        }
    }

    /// Re-confirms the stored key with the server, falling back to local
    /// verification and grace accounting when it is unreachable.
    pub async fn validate_license(&self) -> LicenseResult<ValidationState> {
        if self.store.is_killed() {
            debug!("validation skipped: kill switch in effect");
            return Ok(ValidationState::Killed);
        }
        self.store.discard_expired_entitlement(self.clock.now());
        let Some(key) = self.store.license_key() else {
            return Ok(self.store.state());
        };

        let request = ValidateRequest {
            license_key: key.clone(),
            instance_id: self.instance_id,
            entitlement_nonce: self.store.entitlement().map(|e| e.nonce),
        };
        let state = match known_status(self.client.validate(&request).await) {
            Ok(response) => self.apply_license_response(&key, &response)?,
            Err(e) if e.is_network() => {
                warn!(error = %e, "validation failed, falling back to local verification");
                self.verify_locally(&key)
            }
            Err(e) => return Err(e),
        };
        debug!(state = %state, "license validated");
        Ok(state)
    }

    /// Reports usage and applies any remote instruction in the answer.
    ///
    /// Feature usage drained for the report is put back if the heartbeat
    /// fails.
    pub async fn send_heartbeat(&self) -> LicenseResult<Option<RemoteAction>> {
        self.store.discard_expired_entitlement(self.clock.now());
        let features = self.store.take_feature_usage();
        let request = HeartbeatRequest {
            instance_id: self.instance_id,
            product_version: self.config.product_version.clone(),
            tier: self.store.tier(),
            state: self.store.state(),
            usage: UsageMetrics::collect(self.counter.as_ref()),
            features_used: features.iter().map(|f| f.as_str().to_string()).collect(),
        };

        let response = match self.client.heartbeat(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.store.restore_feature_usage(features);
                return Err(e);
            }
        };

        // A refresh only extends a license that still grants privileges.
        if let Some(token) = &response.entitlement_token {
            let state = self.store.state();
            if state.grants_privileges() && !self.store.is_killed() {
                self.accept_entitlement(token);
            } else {
                debug!(state = %state, "heartbeat entitlement ignored");
            }
        }

        match response.action {
            Some(RemoteAction::Kill) => {
                self.store.kill();
                self.persist_license_key(None);
            }
            Some(RemoteAction::Downgrade) => {
                self.store.downgrade(DowngradeReason::RemoteDowngrade);
            }
            Some(RemoteAction::None) | None => {}
        }
        Ok(response.action)
    }

    /// Replaces the license key, lifting a kill switch.
    pub async fn set_license_key(&self, key: &str) -> LicenseResult<ValidationState> {
        if self.store.is_killed() {
            info!("kill switch cleared by new license key");
        }
        self.store.clear_kill();
        self.activate_license(key).await
    }

    /// Releases the license: stops background tasks, tells the server
    /// (best-effort), resets to the free tier and forgets the key.
    pub async fn deactivate_license(&self) -> LicenseResult<()> {
        self.stop().await;
        if let Some(key) = self.store.license_key() {
            let request = DeactivateRequest {
                license_key: key,
                instance_id: self.instance_id,
            };
            if let Err(e) = self.client.deactivate(&request).await {
                warn!(error = %e, "deactivation not confirmed by licensing server");
            }
        }
        self.store.reset();
        self.persist_license_key(None);
        info!("license deactivated");
        Ok(())
    }

    // ── Background tasks ─────────────────────────────────────────

    /// Registers, validates the stored key, and spawns the validation and
    /// heartbeat tasks. A no-op while already running.
    ///
    /// A `stop` issued while this is still in progress waits for it and then
    /// stops the tasks it spawned.
    pub async fn start(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.register_instance().await {
            warn!(error = %e, "instance registration failed");
        }
        if let Err(e) = self.validate_license().await {
            warn!(error = %e, "initial license validation failed");
        }

        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();
        let validation = spawn_periodic(
            Arc::downgrade(self),
            self.config.validation_interval(),
            shutdown.clone(),
            |validator| async move {
                if let Err(e) = validator.validate_license().await {
                    warn!(error = %e, "periodic validation failed");
                }
            },
        );
        let heartbeat = spawn_periodic(
            Arc::downgrade(self),
            self.config.heartbeat_interval(),
            shutdown,
            |validator| async move {
                if let Err(e) = validator.send_heartbeat().await {
                    warn!(error = %e, "heartbeat failed");
                }
            },
        );

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([validation, heartbeat]);
        self.running.store(true, Ordering::SeqCst);
        info!(
            validation_secs = self.config.validation_interval().as_secs(),
            heartbeat_secs = self.config.heartbeat_interval().as_secs(),
            "license background tasks started"
        );
    }

    /// Signals both tasks to stop and waits for them. `start` may be called
    /// again afterwards.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut shutdown = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
            shutdown.send_replace(true);
            *shutdown = watch::channel(false).0;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "license task ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("license background tasks stopped");
    }

    // ── State transitions ────────────────────────────────────────

    /// Applies a server answer to the store and returns the new state.
    fn apply_license_response(
        &self,
        key: &str,
        response: &LicenseResponse,
    ) -> LicenseResult<ValidationState> {
        let now = self.clock.now();
        match response.status {
            LicenseStatusCode::Active => {
                let license = self.license_from_response(key, response)?;
                match &response.entitlement_token {
                    Some(token) => self.accept_entitlement(token),
                    None => {
                        if self.store.entitlement().is_some_and(|e| e.tier != license.tier) {
                            self.store.clear_entitlement();
                        }
                    }
                }
                self.store.set_license(license, ValidationState::Active);
                self.store.end_grace();
                self.store.mark_validated(now);
                Ok(ValidationState::Active)
            }
            LicenseStatusCode::Expired => {
                self.store.downgrade(DowngradeReason::Expired);
                self.store.mark_validated(now);
                Ok(ValidationState::Downgraded)
            }
            LicenseStatusCode::Revoked => {
                self.store.downgrade(DowngradeReason::Revoked);
                self.store.mark_validated(now);
                Ok(ValidationState::Downgraded)
            }
            LicenseStatusCode::Invalid => {
                self.store.downgrade(DowngradeReason::InvalidKey);
                Ok(ValidationState::Downgraded)
            }
            LicenseStatusCode::Deactivated => {
                self.store.downgrade(DowngradeReason::Deactivated);
                Ok(ValidationState::Downgraded)
            }
            LicenseStatusCode::Unknown => Err(LicenseError::NetworkUnavailable(
                "unrecognised license status".to_string(),
            )),
        }
    }

    fn license_from_response(&self, key: &str, response: &LicenseResponse) -> LicenseResult<License> {
        let claims = verify_license_key(key, &self.verifier).ok();
        let tier = match response.tier.as_deref() {
            Some(name) => Tier::parse(name).ok_or_else(|| LicenseError::UnknownTier(name.to_string()))?,
            None => claims.as_ref().map_or(Tier::Free, |c| c.tier),
        };
        let limits = limits_for(tier)
            .with_overrides(&response.limits)
            .map_err(LicenseError::MalformedPayload)?;

        let mut license = claims.as_ref().map(License::from_claims).unwrap_or_default();
        license.tier = tier;
        license.limits = limits;
        if let Some(id) = &response.customer_id {
            license.customer_id.clone_from(id);
        }
        if let Some(name) = &response.customer_name {
            license.customer_name.clone_from(name);
        }
        if let Some(company) = &response.company {
            license.company.clone_from(company);
        }
        if response.expires_at.is_some() {
            license.expires_at = response.expires_at;
        }
        if response.trial {
            license.is_trial = true;
            license.trial_duration_days = response.trial_days;
            license.trial_started_at = license.trial_started_at.or(Some(license.issued_at));
        }
        license.feature_overrides =
            (!response.features.is_empty()).then(|| response.features.iter().cloned().collect());
        Ok(license)
    }

    /// Local fallback when the server is unreachable.
    ///
    /// Never lifts a downgrade; only the server can do that.
    fn verify_locally(&self, key: &str) -> ValidationState {
        if self.store.state() == ValidationState::Downgraded {
            debug!("staying downgraded until the licensing server confirms the key");
            return ValidationState::Downgraded;
        }
        let now = self.clock.now();
        let claims = match verify_license_key(key, &self.verifier) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "stored license key failed local verification");
                self.store.downgrade(DowngradeReason::InvalidKey);
                return ValidationState::Downgraded;
            }
        };

        let anchor = now.min(claims.expires_at_time());
        self.store.begin_grace(anchor);
        let remaining = self.store.grace_remaining(now).unwrap_or_else(Duration::zero);
        if remaining <= Duration::zero() {
            warn!(tier = %claims.tier, "grace period exhausted");
            self.store.downgrade(DowngradeReason::GraceExhausted);
            return ValidationState::Downgraded;
        }

        let license = self.carry_over(License::from_claims(&claims));
        let state = if claims.is_expired_at(now) {
            ValidationState::GracePeriod
        } else {
            ValidationState::ActiveLocallyVerified
        };
        debug!(
            tier = %license.tier,
            state = %state,
            grace_remaining_hours = remaining.num_hours(),
            "license verified locally"
        );
        self.store.set_license(license, state);
        state
    }

    /// Keeps server-granted limits and features when the locally verified
    /// key is the one they were granted for.
    fn carry_over(&self, mut license: License) -> License {
        let current = self.store.license();
        if current.customer_id == license.customer_id && current.tier == license.tier {
            license.limits = current.limits;
            license.feature_overrides = current.feature_overrides;
        }
        license
    }

    fn accept_entitlement(&self, token: &str) {
        match verify_entitlement_token(token, &self.entitlement_key) {
            Ok(entitlement) => {
                debug!(tier = %entitlement.tier, expires_at = %entitlement.expires_at, "entitlement accepted");
                self.store.set_entitlement(entitlement, token.to_string());
            }
            Err(e) => warn!(error = %e, "entitlement token rejected"),
        }
    }

    fn rejection_error(&self) -> LicenseError {
        match self.store.downgrade_reason() {
            Some(DowngradeReason::Revoked) => LicenseError::Revoked,
            Some(DowngradeReason::Expired) => {
                LicenseError::Expired("reported by licensing server".to_string())
            }
            Some(DowngradeReason::GraceExhausted) => {
                LicenseError::Expired("grace period exhausted".to_string())
            }
            Some(DowngradeReason::Deactivated) => {
                LicenseError::Rejected("license has been deactivated".to_string())
            }
            _ => LicenseError::Rejected("license key is not valid".to_string()),
        }
    }

    fn persist_license_key(&self, key: Option<String>) {
        let settings = PersistedSettings {
            instance_id: Some(self.instance_id),
            license_key: key,
        };
        if let Err(e) = self.settings.save(&settings) {
            warn!(error = %e, "failed to persist license key");
        }
    }
}

/// Error for a refusal of a key that is not the one in use.
fn refusal_error(status: LicenseStatusCode) -> LicenseError {
    match status {
        LicenseStatusCode::Revoked => LicenseError::Revoked,
        LicenseStatusCode::Expired => {
            LicenseError::Expired("reported by licensing server".to_string())
        }
        LicenseStatusCode::Deactivated => {
            LicenseError::Rejected("license has been deactivated".to_string())
        }
        _ => LicenseError::Rejected("license key is not valid".to_string()),
    }
}

/// Treats an unrecognised status as if the server had not answered.
fn known_status(result: LicenseResult<LicenseResponse>) -> LicenseResult<LicenseResponse> {
    match result {
        Ok(response) if response.status == LicenseStatusCode::Unknown => Err(
            LicenseError::NetworkUnavailable("unrecognised license status".to_string()),
        ),
        other => other,
    }
}

fn spawn_periodic<F, Fut>(
    validator: Weak<PhoneHomeValidator>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
    run: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<PhoneHomeValidator>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // start() already ran once.
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(validator) = validator.upgrade() else {
                        break;
                    };
                    run(validator).await;
                }
            }
        }
    })
}
