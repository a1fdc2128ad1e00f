//! Probe configuration.
//!
//! Stored as TOML, by default at:
//! - Linux: `~/.config/livewire/probe.toml`
//! - Windows: `%APPDATA%/livewire/probe.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use livewire_client::ClientConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Default `tracing` filter. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Where the device identity is kept. Only used when `client.device_id`
    /// is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_path: Option<PathBuf>,

    /// Application event kinds to log in addition to lifecycle events.
    #[serde(default)]
    pub subscribe: Vec<String>,

    #[serde(default)]
    pub client: ClientConfig,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            identity_path: None,
            subscribe: Vec::new(),
            client: ClientConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Loads configuration from `path`, writing a default file first if none
    /// exists.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: ProbeConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = ProbeConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix (holds the credential).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("livewire")
            .join("probe.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("livewire").join("probe.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/livewire/probe.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.log_filter, "info");
        assert!(config.subscribe.is_empty());
        assert!(config.client.endpoint.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
            subscribe = ["chat", "typing"]

            [client]
            endpoint = "wss://example.com/socket"
            credential = "token"
            heartbeat_interval_ms = 5000
        "#;
        let config: ProbeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.subscribe, ["chat", "typing"]);
        assert_eq!(config.client.endpoint, "wss://example.com/socket");
        assert_eq!(config.client.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.client.heartbeat_timeout, Duration::from_secs(10));
        assert!(config.client.auto_reconnect);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("probe.toml");

        let config = ProbeConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.log_filter, "info");

        let reloaded = ProbeConfig::load(&path).unwrap();
        assert_eq!(reloaded.client.max_reconnect_attempts, 10);
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("probe.toml");

        let mut config = ProbeConfig::default();
        config.client.endpoint = "ws://127.0.0.1:9000".into();
        config.subscribe = vec!["chat".into()];
        config.save(&path).unwrap();

        let loaded = ProbeConfig::load(&path).unwrap();
        assert_eq!(loaded.client.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(loaded.subscribe, ["chat"]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("probe.toml");
        std::fs::write(&path, "client = 12").unwrap();
        assert!(ProbeConfig::load(&path).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("livewire"));
    }
}
