//! Configuration loading and defaults for idlelockd.
//!
//! This is the daemon's own configuration. The lock settings themselves
//! (timeout, screensaver requirement, enabled) live in the settings store.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::settings::FileSettingsStore;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Interval between idle checks in seconds (default: 30).
    pub poll_interval_seconds: u64,

    /// Path to the lock settings file.
    /// If unset, uses `$XDG_CONFIG_HOME/idlelock/settings.toml`.
    pub settings_path: Option<PathBuf>,

    /// Dry run mode: log lock requests instead of locking.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            settings_path: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(default_path) = Self::default_path()
            && default_path.exists()
        {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    /// Default config path: `$XDG_CONFIG_HOME/idlelock/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("idlelock").join("config.toml"))
    }

    /// Poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    /// Resolve the settings file location.
    pub fn resolve_settings_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.settings_path {
            return Ok(path.clone());
        }

        FileSettingsStore::default_path()
            .context("Could not determine config directory; set settings_path in config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert!(config.settings_path.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            poll_interval_seconds = 10
            settings_path = "/tmp/idlelock/settings.toml"
            dry_run = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval_seconds, 10);
        assert_eq!(
            config.settings_path,
            Some(PathBuf::from("/tmp/idlelock/settings.toml"))
        );
        assert!(config.dry_run);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str("dry_run = true").unwrap();
        assert_eq!(config.poll_interval_seconds, 30);
        assert!(config.dry_run);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = Config {
            poll_interval_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_explicit_settings_path() {
        let config = Config {
            settings_path: Some(PathBuf::from("/etc/idlelock.toml")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_settings_path().unwrap(),
            PathBuf::from("/etc/idlelock.toml")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_seconds = 5\n").unwrap();

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.poll_interval_seconds, 5);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(Config::load_or_default(Some(&path)).is_err());
    }
}
