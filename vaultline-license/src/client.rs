//! HTTP client for the licensing server.
//!
//! The server contract is external; this module only shapes the requests and
//! maps failures. Anything that is not a decodable answer from the server
//! (transport error, timeout, 5xx, garbage body) is `NetworkUnavailable`, which
//! the validator recovers from locally.

use crate::config::LicenseConfig;
use crate::counter::UsageMetrics;
use crate::error::{LicenseError, LicenseResult};
use crate::ids::InstanceId;
use crate::license::ValidationState;
use crate::tier::Tier;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const REGISTER_PATH: &str = "/api/v1/instances/register";
const ACTIVATE_PATH: &str = "/api/v1/licenses/activate";
const VALIDATE_PATH: &str = "/api/v1/licenses/validate";
const DEACTIVATE_PATH: &str = "/api/v1/licenses/deactivate";
const HEARTBEAT_PATH: &str = "/api/v1/instances/heartbeat";

/// One-shot instance registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub instance_id: InstanceId,
    pub product_version: String,
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub tier: Tier,
    #[serde(default)]
    pub usage: UsageMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub license_key: String,
    pub instance_id: InstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    pub product_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub license_key: String,
    pub instance_id: InstanceId,
    /// Nonce of the entitlement currently held, so the server can skip
    /// reissuing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement_nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateRequest {
    pub license_key: String,
    pub instance_id: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub instance_id: InstanceId,
    pub product_version: String,
    pub tier: Tier,
    pub state: ValidationState,
    #[serde(default)]
    pub usage: UsageMetrics,
    /// Wire names of gated features exercised since the last heartbeat.
    #[serde(default)]
    pub features_used: Vec<String>,
}

/// Discriminator on activation, validation and deactivation answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatusCode {
    Active,
    Expired,
    Revoked,
    Invalid,
    Deactivated,
    #[serde(other)]
    Unknown,
}

/// Server answer for activate, validate and deactivate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseResponse {
    pub status: LicenseStatusCode,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub limits: BTreeMap<String, i64>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub entitlement_token: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub trial: bool,
    #[serde(default)]
    pub trial_days: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LicenseResponse {
    /// A bare response carrying only a status.
    #[must_use]
    pub fn with_status(status: LicenseStatusCode) -> Self {
        Self {
            status,
            tier: None,
            limits: BTreeMap::new(),
            features: Vec::new(),
            entitlement_token: None,
            customer_id: None,
            customer_name: None,
            company: None,
            trial: false,
            trial_days: 0,
            expires_at: None,
            message: None,
        }
    }
}

/// Remote instruction piggybacked on a heartbeat answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAction {
    Downgrade,
    Kill,
    #[serde(other)]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub action: Option<RemoteAction>,
    /// Refreshed entitlement, if the server issued one.
    #[serde(default)]
    pub entitlement_token: Option<String>,
}

/// Client for the licensing server's phone-home endpoints.
#[derive(Debug, Clone)]
pub struct LicenseServerClient {
    base_url: String,
    client: Client,
}

impl LicenseServerClient {
    /// Creates a client against `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> LicenseResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vaultline-license/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LicenseError::NetworkUnavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &LicenseConfig) -> LicenseResult<Self> {
        Self::new(config.server_url.clone(), config.request_timeout())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, request: &RegisterRequest) -> LicenseResult<RegisterResponse> {
        self.post(REGISTER_PATH, request).await
    }

    pub async fn activate(&self, request: &ActivateRequest) -> LicenseResult<LicenseResponse> {
        self.post(ACTIVATE_PATH, request).await
    }

    pub async fn validate(&self, request: &ValidateRequest) -> LicenseResult<LicenseResponse> {
        self.post(VALIDATE_PATH, request).await
    }

    pub async fn deactivate(&self, request: &DeactivateRequest) -> LicenseResult<LicenseResponse> {
        self.post(DEACTIVATE_PATH, request).await
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> LicenseResult<HeartbeatResponse> {
        self.post(HEARTBEAT_PATH, request).await
    }

    /// Posts JSON and decodes the JSON answer.
    ///
    /// 4xx answers are still decoded: the server reports `invalid` or
    /// `revoked` keys with a client-error status and a normal body.
    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> LicenseResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "licensing request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LicenseError::NetworkUnavailable(format!("{path}: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LicenseError::NetworkUnavailable(format!(
                "{path}: server returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LicenseError::NetworkUnavailable(format!("{path}: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            LicenseError::NetworkUnavailable(format!(
                "{path}: undecodable response ({status}): {e}"
            ))
        })
    }
}
