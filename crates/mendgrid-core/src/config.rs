//! mendd.toml configuration parser.
//!
//! Every section and field is optional; accessors fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration_or;

const DEFAULT_RESYNC: Duration = Duration::from_secs(300);
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_STATUS_RETRIES: u32 = 3;
const DEFAULT_API_PORT: u16 = 8480;
const DEFAULT_DATA_DIR: &str = "/var/lib/mendgrid";
const DEFAULT_REMEDIATION_NAMESPACE: &str = "mendgrid";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MendConfig {
    pub controller: Option<ControllerConfig>,
    pub api: Option<ApiConfig>,
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Interval at which every policy is re-enqueued (e.g., "5m").
    pub resync_interval: Option<String>,
    /// Re-read/recompute attempts on status write conflicts.
    pub status_retries: Option<u32>,
    /// Delay before retrying a pass that failed on an external call.
    pub error_backoff: Option<String>,
    /// Namespace for remediation objects whose template names none.
    pub remediation_namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: Option<PathBuf>,
}

impl MendConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn resync_interval(&self) -> Duration {
        self.controller
            .as_ref()
            .and_then(|c| c.resync_interval.as_deref())
            .map_or(DEFAULT_RESYNC, |s| parse_duration_or(s, DEFAULT_RESYNC))
    }

    pub fn error_backoff(&self) -> Duration {
        self.controller
            .as_ref()
            .and_then(|c| c.error_backoff.as_deref())
            .map_or(DEFAULT_ERROR_BACKOFF, |s| parse_duration_or(s, DEFAULT_ERROR_BACKOFF))
    }

    pub fn status_retries(&self) -> u32 {
        self.controller
            .as_ref()
            .and_then(|c| c.status_retries)
            .unwrap_or(DEFAULT_STATUS_RETRIES)
            .max(1)
    }

    pub fn remediation_namespace(&self) -> String {
        self.controller
            .as_ref()
            .and_then(|c| c.remediation_namespace.clone())
            .unwrap_or_else(|| DEFAULT_REMEDIATION_NAMESPACE.to_string())
    }

    pub fn api_port(&self) -> u16 {
        self.api.as_ref().and_then(|a| a.port).unwrap_or(DEFAULT_API_PORT)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = MendConfig::from_toml("").unwrap();
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
        assert_eq!(config.error_backoff(), Duration::from_secs(10));
        assert_eq!(config.status_retries(), 3);
        assert_eq!(config.api_port(), 8480);
        assert_eq!(config.remediation_namespace(), "mendgrid");
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/mendgrid"));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[controller]
resync_interval = "1m"
status_retries = 5
error_backoff = "2s"
remediation_namespace = "ops"

[api]
port = 9000

[store]
data_dir = "/tmp/mend"
"#;
        let config = MendConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.resync_interval(), Duration::from_secs(60));
        assert_eq!(config.status_retries(), 5);
        assert_eq!(config.error_backoff(), Duration::from_secs(2));
        assert_eq!(config.remediation_namespace(), "ops");
        assert_eq!(config.api_port(), 9000);
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/mend"));
    }

    #[test]
    fn malformed_durations_fall_back() {
        let config = MendConfig::from_toml("[controller]\nresync_interval = \"often\"\nstatus_retries = 0\n").unwrap();
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
        // At least one attempt is always made.
        assert_eq!(config.status_retries(), 1);
    }

    #[test]
    fn config_writes_back_as_toml() {
        let config = MendConfig {
            api: Some(ApiConfig { port: Some(1234) }),
            ..Default::default()
        };
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("1234"));
    }
}
