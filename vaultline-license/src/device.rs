//! Machine fingerprinting for air-gap license binding.
//!
//! The fingerprint hashes together whatever stable machine identifiers are
//! available: the platform machine ID and the hardware UUID, with the
//! hostname only as a last resort. Having none of them is an error.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;

/// Information about the current host, reported on instance registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// Hostname.
    pub hostname: String,
    /// CPU architecture.
    pub arch: String,
}

impl DeviceInfo {
    /// Collects information about the current host.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            os_version: get_os_version(),
            hostname: get_hostname().unwrap_or_else(|| "unknown".to_string()),
            arch: env::consts::ARCH.to_string(),
        }
    }
}

/// One stable identifier contributing to a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineIdentifier {
    MachineId(String),
    HardwareUuid(String),
    Hostname(String),
}

impl MachineIdentifier {
    fn label(&self) -> &'static str {
        match self {
            Self::MachineId(_) => "machine-id",
            Self::HardwareUuid(_) => "hardware-uuid",
            Self::Hostname(_) => "hostname",
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::MachineId(v) | Self::HardwareUuid(v) | Self::Hostname(v) => v,
        }
    }
}

/// A stable fingerprint that identifies this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HardwareFingerprint {
    id: String,
}

impl HardwareFingerprint {
    /// Computes the fingerprint of the current machine.
    pub fn current() -> LicenseResult<Self> {
        Self::from_identifiers(&collect_hardware_ids())
    }

    /// Computes a fingerprint from explicit identifiers.
    ///
    /// Empty values are skipped. Hostnames are only used when no machine ID
    /// or hardware UUID is present.
    pub fn from_identifiers(ids: &[MachineIdentifier]) -> LicenseResult<Self> {
        let present: Vec<&MachineIdentifier> =
            ids.iter().filter(|id| !id.value().trim().is_empty()).collect();

        let stable: Vec<&MachineIdentifier> = present
            .iter()
            .copied()
            .filter(|id| !matches!(id, MachineIdentifier::Hostname(_)))
            .collect();

        let chosen = if stable.is_empty() { present } else { stable };
        if chosen.is_empty() {
            return Err(LicenseError::HardwareUnavailable);
        }

        let combined = chosen
            .iter()
            .map(|id| format!("{}={}", id.label(), id.value().trim()))
            .collect::<Vec<_>>()
            .join("|");

        let mut hasher = Sha256::new();
        hasher.update(combined.as_bytes());

        Ok(Self {
            id: hex::encode(hasher.finalize()),
        })
    }

    /// Wraps an already-computed fingerprint string.
    #[must_use]
    pub fn from_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Returns the fingerprint ID (lowercase hex).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Compares against a fingerprint recorded in a license, ignoring case.
    #[must_use]
    pub fn matches(&self, recorded: &str) -> bool {
        self.id.eq_ignore_ascii_case(recorded.trim())
    }
}

/// Collects hardware identifiers for fingerprinting.
fn collect_hardware_ids() -> Vec<MachineIdentifier> {
    let mut ids = Vec::new();

    if let Some(machine_id) = get_machine_id() {
        ids.push(MachineIdentifier::MachineId(machine_id));
    }
    if let Some(uuid) = get_hardware_uuid() {
        ids.push(MachineIdentifier::HardwareUuid(uuid));
    }
    if let Some(hostname) = get_hostname() {
        ids.push(MachineIdentifier::Hostname(hostname));
    }

    ids
}

fn get_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

fn get_os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("VERSION_ID="))
                    .map(|l| {
                        l.trim_start_matches("VERSION_ID=")
                            .trim_matches('"')
                            .to_string()
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        "unknown".to_string()
    }
}

fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn get_hardware_uuid() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "linux")]
    {
        // Usually root-only; absent for unprivileged processes.
        std::fs::read_to_string("/sys/class/dmi/id/product_uuid")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
