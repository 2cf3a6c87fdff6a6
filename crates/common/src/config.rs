use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::ListerConfig;

pub const APP_NAME: &str = "pdrive";
pub const SESSION_FILE_NAME: &str = "sessions.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no cache directory found")]
    NoCacheDirectory,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Account whose credentials are restored
    #[serde(default = "default_account")]
    pub account: String,
    /// Credential file (defaults to `<cache>/pdrive/sessions.json`)
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    /// Bound on each network phase of restore and login, and on every path
    ///  resolution or child listing of the sessions it produces
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub lister: ListerConfig,
}

fn default_account() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            session_file: None,
            timeout_secs: default_timeout_secs(),
            lister: ListerConfig::default(),
        }
    }
}

impl DriveConfig {
    /// Load a config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn session_file_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.session_file {
            return Ok(path.clone());
        }
        let cache = dirs::cache_dir().ok_or(ConfigError::NoCacheDirectory)?;
        Ok(cache.join(APP_NAME).join(SESSION_FILE_NAME))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drive::ListPolicy;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = DriveConfig::from_toml_str("").unwrap();
        assert_eq!(config, DriveConfig::default());
        assert_eq!(config.account, "default");
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.lister.max_workers, 10);
        assert_eq!(config.lister.policy, ListPolicy::BestEffort);
    }

    #[test]
    fn test_partial_toml() {
        let config = DriveConfig::from_toml_str(
            r#"
account = "work"
session_file = "/tmp/pdrive/sessions.json"

[lister]
max_workers = 4
policy = "fail_fast"
"#,
        )
        .unwrap();
        assert_eq!(config.account, "work");
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.lister.max_workers, 4);
        assert_eq!(config.lister.policy, ListPolicy::FailFast);
        assert_eq!(
            config.session_file_path().unwrap(),
            PathBuf::from("/tmp/pdrive/sessions.json")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert_eq!(DriveConfig::load(&path).unwrap(), DriveConfig::default());

        let mut config = DriveConfig::default();
        config.account = "home".to_string();
        config.lister.max_workers = 3;
        config.save(&path).unwrap();

        assert_eq!(DriveConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_policy() {
        let result = DriveConfig::from_toml_str("[lister]\npolicy = \"sometimes\"\n");
        assert!(matches!(result, Err(ConfigError::TomlDe(_))));
    }
}
