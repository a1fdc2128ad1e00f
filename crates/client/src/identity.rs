//! Stable device identifier persisted on disk.
//!
//! The server keys sessions by device, so the id must survive restarts. It is
//! generated once and stored as a small JSON document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors from identity persistence.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("identity file {0:?} holds an empty device id")]
    Empty(PathBuf),
}

/// On-disk device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
}

impl DeviceIdentity {
    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Loads the identity at `path`, creating and persisting one if the file
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let identity: DeviceIdentity = serde_json::from_str(&data)?;
            if identity.device_id.is_empty() {
                return Err(IdentityError::Empty(path.to_path_buf()));
            }
            debug!(path = %path.display(), "loaded device identity");
            return Ok(identity);
        }

        let identity = Self::generate();
        identity.persist(path)?;
        info!(device_id = %identity.device_id, path = %path.display(), "generated device identity");
        Ok(identity)
    }

    /// Writes the identity to `path`, creating parent directories.
    pub fn persist(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Returns the default identity path under the platform config directory.
pub fn default_identity_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("livewire").join("device.json"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
