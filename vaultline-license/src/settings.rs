//! Persisted instance settings consumed by the validator.
//!
//! The platform owns where these live; the licensing core only reads them
//! once at startup and writes back the license key when it changes.

use crate::error::{LicenseError, LicenseResult};
use crate::ids::InstanceId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Settings the licensing core needs across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub instance_id: Option<InstanceId>,
    pub license_key: Option<String>,
}

/// Storage for [`PersistedSettings`].
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> LicenseResult<PersistedSettings>;
    fn save(&self, settings: &PersistedSettings) -> LicenseResult<()>;
}

/// Settings held in memory only.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    inner: Mutex<PersistedSettings>,
}

impl InMemorySettings {
    #[must_use]
    pub fn new(settings: PersistedSettings) -> Self {
        Self {
            inner: Mutex::new(settings),
        }
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> PersistedSettings {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsStore for InMemorySettings {
    fn load(&self) -> LicenseResult<PersistedSettings> {
        Ok(self.snapshot())
    }

    fn save(&self, settings: &PersistedSettings) -> LicenseResult<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}

/// Settings stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config directory
    /// (e.g. `~/.config/vaultline/license.json`).
    pub fn default_location() -> LicenseResult<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| LicenseError::Storage("no config directory on this platform".into()))?;
        Ok(Self::new(dir.join("vaultline").join("license.json")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> LicenseResult<PersistedSettings> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedSettings::default()),
            Err(e) => Err(LicenseError::Storage(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn save(&self, settings: &PersistedSettings) -> LicenseResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LicenseError::Storage(format!("failed to create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_vec_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| LicenseError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            LicenseError::Storage(format!("failed to replace {}: {e}", self.path.display()))
        })
    }
}
