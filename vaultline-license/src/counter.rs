//! Resource-counting collaborators.
//!
//! The platform's persistence layer implements [`ResourceCounter`]; the
//! licensing core never stores counts itself.

use crate::ids::OrganizationId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counts the resources that tier limits apply to.
pub trait ResourceCounter: Send + Sync {
    fn count_agents(&self) -> anyhow::Result<u64>;

    fn count_users(&self) -> anyhow::Result<u64>;

    /// Counts organizations, optionally only those under `scope`.
    fn count_organizations(&self, scope: Option<OrganizationId>) -> anyhow::Result<u64>;

    fn count_repositories(&self, org: OrganizationId) -> anyhow::Result<u64>;

    fn count_servers(&self) -> anyhow::Result<u64> {
        Ok(1)
    }

    fn storage_bytes_used(&self) -> anyhow::Result<u64> {
        Ok(0)
    }
}

/// Anonymized resource counts reported on registration and heartbeat.
///
/// A count the collaborator could not produce is omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizations: Option<u64>,
}

impl UsageMetrics {
    /// Collects counts, skipping any that fail.
    pub fn collect(counter: &dyn ResourceCounter) -> Self {
        Self {
            agents: ok_or_log("agents", counter.count_agents()),
            users: ok_or_log("users", counter.count_users()),
            organizations: ok_or_log("organizations", counter.count_organizations(None)),
        }
    }
}

fn ok_or_log(what: &str, result: anyhow::Result<u64>) -> Option<u64> {
    match result {
        Ok(n) => Some(n),
        Err(e) => {
            debug!(resource = what, error = %e, "count unavailable for usage metrics");
            None
        }
    }
}
