//! Resource limit and feature gate checks.
//!
//! The enforcer holds no state of its own: limits and features come from the
//! [`EntitlementStore`], counts from the platform's [`ResourceCounter`].

use crate::clock::Clock;
use crate::counter::ResourceCounter;
use crate::error::{LicenseError, LicenseResult};
use crate::ids::OrganizationId;
use crate::license::ValidationState;
use crate::store::EntitlementStore;
use crate::tier::{Feature, Limit, Resource, Tier, required_tier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Current count against limit for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub resource: Resource,
    /// `None` when the count could not be obtained.
    pub current: Option<u64>,
    pub limit: Limit,
}

impl ResourceUsage {
    #[must_use]
    pub fn is_at_limit(&self) -> bool {
        self.current.is_some_and(|c| self.limit.is_reached_by(c))
    }
}

/// Usage summary for status pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub tier: Tier,
    pub state: ValidationState,
    pub resources: Vec<ResourceUsage>,
    /// Wire names of the features currently granted.
    pub features: Vec<String>,
}

/// Admission checks against the current tier.
pub struct LimitEnforcer {
    store: Arc<EntitlementStore>,
    counter: Arc<dyn ResourceCounter>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LimitEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitEnforcer").finish_non_exhaustive()
    }
}

impl LimitEnforcer {
    pub fn new(
        store: Arc<EntitlementStore>,
        counter: Arc<dyn ResourceCounter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            counter,
            clock,
        }
    }

    /// The limit currently in force for `resource`.
    #[must_use]
    pub fn limit(&self, resource: Resource) -> Limit {
        self.store.effective_limits(self.clock.now()).get(resource)
    }

    pub fn can_add_agent(&self) -> LicenseResult<()> {
        self.check(Resource::Agents, self.counter.count_agents())
    }

    pub fn can_add_user(&self) -> LicenseResult<()> {
        self.check(Resource::Users, self.counter.count_users())
    }

    pub fn can_add_organization(&self) -> LicenseResult<()> {
        self.check(Resource::Organizations, self.counter.count_organizations(None))
    }

    /// Checks the per-organization repository limit.
    pub fn can_add_repository(&self, org: OrganizationId) -> LicenseResult<()> {
        self.check(Resource::Repositories, self.counter.count_repositories(org))
    }

    pub fn can_add_server(&self) -> LicenseResult<()> {
        self.check(Resource::Servers, self.counter.count_servers())
    }

    /// Checks that `additional_bytes` more fit in the storage limit.
    pub fn can_store(&self, additional_bytes: u64) -> LicenseResult<()> {
        let used = self.counter.storage_bytes_used().map_err(counting_error)?;
        let limit = self.limit(Resource::Storage);
        match limit.count() {
            Some(max) if used.saturating_add(additional_bytes) > max => {
                debug!(used, additional_bytes, limit = max, "storage limit reached");
                Err(LicenseError::LimitExceeded {
                    resource: Resource::Storage,
                    limit: max,
                    current: used,
                })
            }
            _ => Ok(()),
        }
    }

    fn check(&self, resource: Resource, current: anyhow::Result<u64>) -> LicenseResult<()> {
        let current = current.map_err(counting_error)?;
        let limit = self.limit(resource);
        if !limit.is_reached_by(current) {
            return Ok(());
        }
        let max = limit.count().unwrap_or(u64::MAX);
        debug!(%resource, current, limit = max, "resource limit reached");
        Err(LicenseError::LimitExceeded {
            resource,
            limit: max,
            current,
        })
    }

    /// Returns true if `feature` is currently granted.
    #[must_use]
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.store
            .effective_features(self.clock.now())
            .contains(feature.as_str())
    }

    /// Gate for a feature; records the use when granted.
    pub fn require_feature(&self, feature: Feature) -> LicenseResult<()> {
        if self.has_feature(feature) {
            self.store.record_feature_use(feature);
            return Ok(());
        }
        let required = required_tier(feature);
        debug!(%feature, %required, tier = %self.store.tier(), "feature not licensed");
        Err(LicenseError::FeatureNotLicensed { feature, required })
    }

    pub fn require_sso(&self) -> LicenseResult<()> {
        self.require_feature(Feature::Sso)
    }

    pub fn require_audit_logs(&self) -> LicenseResult<()> {
        self.require_feature(Feature::AuditLogs)
    }

    pub fn require_air_gap(&self) -> LicenseResult<()> {
        self.require_feature(Feature::AirGap)
    }

    pub fn require_multi_org(&self) -> LicenseResult<()> {
        self.require_feature(Feature::MultiOrg)
    }

    pub fn require_dr_runbooks(&self) -> LicenseResult<()> {
        self.require_feature(Feature::DrRunbooks)
    }

    /// Counts against limits for every globally counted resource.
    /// Repositories are per organization and not included.
    #[must_use]
    pub fn usage_report(&self) -> UsageReport {
        let now = self.clock.now();
        let limits = self.store.effective_limits(now);
        let counts = [
            (Resource::Agents, self.counter.count_agents()),
            (Resource::Users, self.counter.count_users()),
            (Resource::Organizations, self.counter.count_organizations(None)),
            (Resource::Servers, self.counter.count_servers()),
            (Resource::Storage, self.counter.storage_bytes_used()),
        ];
        let resources = counts
            .into_iter()
            .map(|(resource, count)| ResourceUsage {
                resource,
                current: count
                    .inspect_err(|e| debug!(%resource, error = %e, "count unavailable"))
                    .ok(),
                limit: limits.get(resource),
            })
            .collect();
        UsageReport {
            tier: self.store.tier(),
            state: self.store.state(),
            resources,
            features: self.store.effective_features(now).into_iter().collect(),
        }
    }
}

fn counting_error(e: anyhow::Error) -> LicenseError {
    LicenseError::Counting(format!("{e:#}"))
}
