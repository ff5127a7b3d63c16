//! Authenticator configuration
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! the stock policy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lockout::LockoutConfig;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "auth.toml";

/// Configuration directory under the platform config dir
const CONFIG_DIR_NAME: &str = "kasir";

/// Default bound on a single directory lookup
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 10_000;

/// Default countdown cadence
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Settings for one authentication session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lockout policy constants
    pub lockout: LockoutConfig,

    /// Give up on a directory lookup after this long (milliseconds)
    pub lookup_timeout_ms: u64,

    /// Countdown tick cadence (milliseconds)
    pub tick_interval_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutConfig::default(),
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl AuthConfig {
    /// Platform default location, e.g. `~/.config/kasir/auth.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lockout.validate()?;
        if self.lookup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lookup_timeout_ms must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AuthConfig::from_toml_str("").unwrap();
        assert_eq!(config, AuthConfig::default());
        assert_eq!(config.lockout.initial_attempts, 5);
        assert_eq!(config.lockout.escalated_attempts, 3);
        assert_eq!(config.lockout.lockout_duration_ms, 180_000);
        assert_eq!(config.lookup_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_override() {
        let config = AuthConfig::from_toml_str(
            r#"
lookup_timeout_ms = 2500

[lockout]
lockout_duration_ms = 60000
"#,
        )
        .unwrap();
        assert_eq!(config.lookup_timeout_ms, 2500);
        assert_eq!(config.lockout.lockout_duration_ms, 60_000);
        assert_eq!(config.lockout.initial_attempts, 5);
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AuthConfig::from_toml_str("tick_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AuthConfig::from_toml_str("[lockout]\ninitial_attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AuthConfig::from_toml_str("lookup_timeout_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_or_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("auth.toml");

        assert_eq!(
            AuthConfig::load_or_default(&path).unwrap(),
            AuthConfig::default()
        );

        fs::write(&path, "[lockout]\nescalated_attempts = 2\n").unwrap();
        let config = AuthConfig::load_or_default(&path).unwrap();
        assert_eq!(config.lockout.escalated_attempts, 2);
    }

    #[test]
    fn test_default_path_file_name() {
        let path = AuthConfig::default_path();
        assert!(path.ends_with("kasir/auth.toml"));
    }
}
