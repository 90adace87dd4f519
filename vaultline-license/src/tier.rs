//! Tier policy: the static mapping from subscription tier to numeric limits
//! and feature set.
//!
//! The per-tier feature lists are the single authority for feature access.
//! The minimum tier for each feature is derived from those lists once, at
//! first use, so the ordering check can never drift from the lists.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

const GIB: u64 = 1024 * 1024 * 1024;

/// Raw wire value of the "unlimited" sentinel.
pub const UNLIMITED: i64 = -1;

/// Subscription tier, ordered `Free < Pro < Enterprise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 3] = [Self::Free, Self::Pro, Self::Enterprise];

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Name for upgrade prompts.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Pro => "Pro",
            Self::Enterprise => "Enterprise",
        }
    }

    /// Parses a tier name. Returns `None` for names outside the policy.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    /// Parses a tier name, mapping anything unknown to the lowest tier.
    #[must_use]
    pub fn parse_or_lowest(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Free)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A countable resource governed by [`TierLimits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Agents,
    Users,
    Organizations,
    Servers,
    Repositories,
    Storage,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Self::Agents,
        Self::Users,
        Self::Organizations,
        Self::Servers,
        Self::Repositories,
        Self::Storage,
    ];

    /// Maps a limits-map key to a resource. Both the short (`agents`) and
    /// long (`max_agents`) spellings are accepted.
    #[must_use]
    pub fn from_limit_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        let short = key.strip_prefix("max_").unwrap_or(&key);
        match short {
            "agents" => Some(Self::Agents),
            "users" => Some(Self::Users),
            "orgs" | "organizations" => Some(Self::Organizations),
            "servers" => Some(Self::Servers),
            "repos" | "repositories" => Some(Self::Repositories),
            "storage" | "storage_bytes" => Some(Self::Storage),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Agents => "agents",
            Self::Users => "users",
            Self::Organizations => "organizations",
            Self::Servers => "servers",
            Self::Repositories => "repositories",
            Self::Storage => "storage bytes",
        })
    }
}

/// A numeric limit: a non-negative count or the unlimited sentinel.
///
/// On the wire this is a plain integer, with `-1` meaning unlimited. Any
/// other negative value is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    Count(u64),
    Unlimited,
}

impl Limit {
    /// Converts a raw wire value. Returns `None` for negatives other than
    /// the sentinel.
    #[must_use]
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            UNLIMITED => Some(Self::Unlimited),
            n if n >= 0 => Some(Self::Count(n as u64)),
            _ => None,
        }
    }

    /// Raw wire value.
    #[must_use]
    pub fn to_raw(self) -> i64 {
        match self {
            Self::Unlimited => UNLIMITED,
            Self::Count(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }

    #[must_use]
    pub fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// The finite count, if any.
    #[must_use]
    pub fn count(self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(n),
            Self::Unlimited => None,
        }
    }

    /// Returns true if `current` is already at or over this limit.
    #[must_use]
    pub fn is_reached_by(self, current: u64) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Count(limit) => current >= limit,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_raw())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Self::from_raw(raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid limit {raw}: only -1 may be negative"))
        })
    }
}

/// Numeric resource limits for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_agents: Limit,
    pub max_users: Limit,
    pub max_orgs: Limit,
    pub max_servers: Limit,
    pub max_storage_bytes: Limit,
    /// Repositories per organization.
    pub max_repositories: Limit,
}

impl TierLimits {
    /// Every limit set to the unlimited sentinel.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_agents: Limit::Unlimited,
            max_users: Limit::Unlimited,
            max_orgs: Limit::Unlimited,
            max_servers: Limit::Unlimited,
            max_storage_bytes: Limit::Unlimited,
            max_repositories: Limit::Unlimited,
        }
    }

    #[must_use]
    pub fn get(&self, resource: Resource) -> Limit {
        match resource {
            Resource::Agents => self.max_agents,
            Resource::Users => self.max_users,
            Resource::Organizations => self.max_orgs,
            Resource::Servers => self.max_servers,
            Resource::Repositories => self.max_repositories,
            Resource::Storage => self.max_storage_bytes,
        }
    }

    /// Returns a copy with one limit replaced.
    #[must_use]
    pub fn with(mut self, resource: Resource, limit: Limit) -> Self {
        let slot = match resource {
            Resource::Agents => &mut self.max_agents,
            Resource::Users => &mut self.max_users,
            Resource::Organizations => &mut self.max_orgs,
            Resource::Servers => &mut self.max_servers,
            Resource::Repositories => &mut self.max_repositories,
            Resource::Storage => &mut self.max_storage_bytes,
        };
        *slot = limit;
        self
    }

    /// Applies a server-supplied limits map on top of these limits.
    ///
    /// Keys may use either alias (`agents` or `max_agents`). Unknown keys are
    /// ignored; values below the sentinel are rejected.
    pub fn with_overrides(self, overrides: &BTreeMap<String, i64>) -> Result<Self, String> {
        let mut limits = self;
        for (key, raw) in overrides {
            let Some(resource) = Resource::from_limit_key(key) else {
                tracing::debug!(key = %key, "ignoring unknown limit key");
                continue;
            };
            let limit = Limit::from_raw(*raw)
                .ok_or_else(|| format!("invalid value {raw} for limit '{key}'"))?;
            limits = limits.with(resource, limit);
        }
        Ok(limits)
    }
}

/// A named capability gated by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    EmailReports,
    Sso,
    AuditLogs,
    ApiAccess,
    DrRunbooks,
    CustomRetention,
    MultiOrg,
    WhiteLabel,
    AirGap,
    LegalHold,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Self::EmailReports,
        Self::Sso,
        Self::AuditLogs,
        Self::ApiAccess,
        Self::DrRunbooks,
        Self::CustomRetention,
        Self::MultiOrg,
        Self::WhiteLabel,
        Self::AirGap,
        Self::LegalHold,
    ];

    /// Wire name, as used in entitlement tokens and heartbeats.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EmailReports => "email_reports",
            Self::Sso => "sso",
            Self::AuditLogs => "audit_logs",
            Self::ApiAccess => "api_access",
            Self::DrRunbooks => "dr_runbooks",
            Self::CustomRetention => "custom_retention",
            Self::MultiOrg => "multi_org",
            Self::WhiteLabel => "white_label",
            Self::AirGap => "air_gap",
            Self::LegalHold => "legal_hold",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s.trim())
    }

    /// Human-readable description for upgrade messages.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::EmailReports => "Scheduled email reports",
            Self::Sso => "Single sign-on (OIDC)",
            Self::AuditLogs => "Audit logs",
            Self::ApiAccess => "REST API access",
            Self::DrRunbooks => "Disaster recovery runbooks",
            Self::CustomRetention => "Custom retention policies",
            Self::MultiOrg => "Multiple organizations",
            Self::WhiteLabel => "White labeling",
            Self::AirGap => "Air-gapped deployment",
            Self::LegalHold => "Legal hold",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FREE_FEATURES: &[Feature] = &[Feature::EmailReports];

const PRO_FEATURES: &[Feature] = &[
    Feature::EmailReports,
    Feature::Sso,
    Feature::AuditLogs,
    Feature::ApiAccess,
    Feature::DrRunbooks,
    Feature::CustomRetention,
];

const ENTERPRISE_FEATURES: &[Feature] = &[
    Feature::EmailReports,
    Feature::Sso,
    Feature::AuditLogs,
    Feature::ApiAccess,
    Feature::DrRunbooks,
    Feature::CustomRetention,
    Feature::MultiOrg,
    Feature::WhiteLabel,
    Feature::AirGap,
    Feature::LegalHold,
];

fn feature_list(tier: Tier) -> &'static [Feature] {
    match tier {
        Tier::Free => FREE_FEATURES,
        Tier::Pro => PRO_FEATURES,
        Tier::Enterprise => ENTERPRISE_FEATURES,
    }
}

/// Minimum tier per feature, derived from the explicit lists.
static REQUIRED_TIERS: LazyLock<BTreeMap<Feature, Tier>> = LazyLock::new(|| {
    let mut required = BTreeMap::new();
    for tier in Tier::ALL {
        for feature in feature_list(tier) {
            required.entry(*feature).or_insert(tier);
        }
    }
    required
});

/// Returns the limits for a tier.
#[must_use]
pub fn limits_for(tier: Tier) -> TierLimits {
    match tier {
        Tier::Free => TierLimits {
            max_agents: Limit::Count(3),
            max_users: Limit::Count(3),
            max_orgs: Limit::Count(1),
            max_servers: Limit::Count(1),
            max_storage_bytes: Limit::Count(100 * GIB),
            max_repositories: Limit::Count(2),
        },
        Tier::Pro => TierLimits {
            max_agents: Limit::Count(25),
            max_users: Limit::Count(10),
            max_orgs: Limit::Count(3),
            max_servers: Limit::Count(5),
            max_storage_bytes: Limit::Count(1024 * GIB),
            max_repositories: Limit::Count(10),
        },
        Tier::Enterprise => TierLimits::unlimited(),
    }
}

/// Returns the limits for a tier name; unknown names get the lowest tier's.
#[must_use]
pub fn limits_for_name(tier: &str) -> TierLimits {
    limits_for(Tier::parse_or_lowest(tier))
}

/// Returns the feature set of a tier.
#[must_use]
pub fn features_for(tier: Tier) -> BTreeSet<Feature> {
    feature_list(tier).iter().copied().collect()
}

/// Returns the feature set for a tier name; unknown names get the lowest
/// tier's.
#[must_use]
pub fn features_for_name(tier: &str) -> BTreeSet<Feature> {
    features_for(Tier::parse_or_lowest(tier))
}

/// Lowest tier whose list contains the feature.
#[must_use]
pub fn required_tier(feature: Feature) -> Tier {
    REQUIRED_TIERS.get(&feature).copied().unwrap_or(Tier::Free)
}

/// Lowest tier for a feature name; unmapped names map to the lowest tier.
#[must_use]
pub fn required_tier_for_name(feature: &str) -> Tier {
    Feature::parse(feature).map_or(Tier::Free, required_tier)
}

/// Total order over tiers.
#[must_use]
pub fn compare(a: Tier, b: Tier) -> Ordering {
    a.cmp(&b)
}

/// Returns true if `tier` is at or above the feature's required tier and the
/// feature appears in the tier's list.
#[must_use]
pub fn tier_has_feature(tier: Tier, feature: Feature) -> bool {
    compare(tier, required_tier(feature)) != Ordering::Less && feature_list(tier).contains(&feature)
}

/// Returns true if every tier's feature list contains all features of every
/// lower tier.
#[must_use]
pub fn is_monotonic() -> bool {
    Tier::ALL.windows(2).all(|pair| {
        let higher = features_for(pair[1]);
        features_for(pair[0]).is_subset(&higher)
    })
}
