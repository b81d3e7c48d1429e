#![forbid(unsafe_code)]

// Load-test configuration: TOML file, then environment overrides

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Config file read from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "dh-stress.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// WebSocket endpoint of the device API
    pub server_url: String,
    /// Refresh token exchanged for an access token on every connection
    pub refresh_token: String,
    /// Identifier every simulated device registers as
    pub device_id: String,
    /// Append `-<runner index>` to `device_id` so each device is distinct
    pub unique_device_ids: bool,
    /// Seconds to wait for a response to any request
    pub request_timeout_secs: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1/api/websocket".to_string(),
            refresh_token: "JwtRefreshTokenHere=".to_string(),
            device_id: "dh-stress-test".to_string(),
            unique_device_ids: false,
            request_timeout_secs: 30,
        }
    }
}

impl StressConfig {
    /// Reads `path` if given (it must exist), otherwise [`DEFAULT_CONFIG_FILE`]
    /// in the working directory when present, otherwise the defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), path, |name| std::env::var(name).ok())
    }

    /// [`load`](Self::load) with the fallback file looked up in `dir` and
    /// overrides resolved by `lookup`.
    pub fn load_from<F>(dir: &Path, path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = dir.join(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(path),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Rejects a zero request timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        Ok(())
    }

    /// Applies `DH_SERVER_URL`, `DH_REFRESH_TOKEN`, `DH_DEVICE_ID` and
    /// `DH_REQUEST_TIMEOUT` as resolved by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DH_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(token) = lookup("DH_REFRESH_TOKEN") {
            self.refresh_token = token;
        }
        if let Some(device_id) = lookup("DH_DEVICE_ID") {
            self.device_id = device_id;
        }
        if let Some(timeout) = lookup("DH_REQUEST_TIMEOUT") {
            self.request_timeout_secs = timeout
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidOverride {
                    name: "DH_REQUEST_TIMEOUT",
                    value: timeout.clone(),
                })?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Device identifier for the runner at `index`. Shared by all runners
    /// unless `unique_device_ids` is set.
    pub fn device_id_for(&self, index: usize) -> String {
        if self.unique_device_ids {
            format!("{}-{}", self.device_id, index)
        } else {
            self.device_id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server_url = \"wss://playground.example/api/websocket\"").unwrap();
        writeln!(file, "refresh_token = \"abc\"").unwrap();

        let config = StressConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server_url, "wss://playground.example/api/websocket");
        assert_eq!(config.refresh_token, "abc");
        assert_eq!(config.device_id, StressConfig::default().device_id);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = StressConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "request_timeout_secs = \"soon\"").unwrap();
        assert!(matches!(
            StressConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            [("DH_DEVICE_ID", "bench"), ("DH_REQUEST_TIMEOUT", "5")].into();
        let mut config = StressConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.device_id, "bench");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.server_url, StressConfig::default().server_url);

        let mut config = StressConfig::default();
        let result =
            config.apply_overrides(|k| (k == "DH_REQUEST_TIMEOUT").then(|| "x".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));

        let mut config = StressConfig::default();
        let result =
            config.apply_overrides(|k| (k == "DH_REQUEST_TIMEOUT").then(|| "0".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_zero_timeout_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.toml");
        std::fs::write(&path, "request_timeout_secs = 0\n").unwrap();

        let result = StressConfig::load_from(dir.path(), Some(&path), |_| None);
        assert!(matches!(result, Err(ConfigError::ZeroRequestTimeout)));
    }

    #[test]
    fn test_default_file_found_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StressConfig::load_from(dir.path(), None, |_| None).unwrap();
        assert_eq!(config, StressConfig::default());

        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "device_id = \"from-cwd\"\nunique_device_ids = true\n",
        )
        .unwrap();
        let config = StressConfig::load_from(dir.path(), None, |_| None).unwrap();
        assert_eq!(config.device_id, "from-cwd");
        assert!(config.unique_device_ids);

        let config = StressConfig::load_from(dir.path(), None, |k| {
            (k == "DH_DEVICE_ID").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.device_id, "from-env");
    }

    #[test]
    fn test_device_ids_shared_unless_unique() {
        let mut config = StressConfig::default();
        assert_eq!(config.device_id_for(0), config.device_id_for(7));
        config.unique_device_ids = true;
        assert_eq!(config.device_id_for(7), format!("{}-7", config.device_id));
    }
}
