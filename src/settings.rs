//! Persisted lock settings.
//!
//! Three flat entries, `LockTimeout` (ms), `RequireScreenSaver` (0/1) and
//! `Enabled` (0/1), kept in a per-user key/value store.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::domain::ConfigChange;

/// Default lock timeout: 20 minutes.
pub const DEFAULT_LOCK_TIMEOUT_MS: u32 = 20 * 60_000;

/// Name of a persisted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SettingKey {
    LockTimeout,
    RequireScreenSaver,
    Enabled,
}

impl SettingKey {
    /// Exact key used in the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LockTimeout => "LockTimeout",
            Self::RequireScreenSaver => "RequireScreenSaver",
            Self::Enabled => "Enabled",
        }
    }
}

/// Errors from a settings store.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Failed to serialize settings: {0}")]
    Serialize(String),
}

/// Minimal key/value persistence for the lock settings.
pub trait SettingsStore {
    /// Read one entry. `Ok(None)` means the entry is absent.
    fn read_value(&self, key: SettingKey) -> Result<Option<u32>, SettingsError>;

    /// Write the given entries, leaving other entries untouched.
    fn write_values(&mut self, values: &[(SettingKey, u32)]) -> Result<(), SettingsError>;
}

/// Lock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Idle time before locking, in milliseconds.
    pub lock_timeout_ms: u32,

    /// Only lock if the screensaver was seen during the idle stretch.
    pub require_screen_saver: bool,

    /// Whether idle locking is active.
    pub enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            require_screen_saver: true,
            enabled: true,
        }
    }
}

impl Settings {
    /// Load settings, falling back to the default of each field that is
    /// missing or unreadable.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();

        Self {
            lock_timeout_ms: read_or(store, SettingKey::LockTimeout, defaults.lock_timeout_ms),
            require_screen_saver: read_or(
                store,
                SettingKey::RequireScreenSaver,
                u32::from(defaults.require_screen_saver),
            ) != 0,
            enabled: read_or(store, SettingKey::Enabled, u32::from(defaults.enabled)) != 0,
        }
    }

    /// Write all three entries.
    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        store.write_values(&[
            (SettingKey::LockTimeout, self.lock_timeout_ms),
            (
                SettingKey::RequireScreenSaver,
                u32::from(self.require_screen_saver),
            ),
            (SettingKey::Enabled, u32::from(self.enabled)),
        ])
    }

    /// Apply a single change in memory.
    pub fn apply(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::Timeout(ms) => self.lock_timeout_ms = ms,
            ConfigChange::RequireScreenSaver(require) => self.require_screen_saver = require,
            ConfigChange::Enabled(enabled) => self.enabled = enabled,
        }
    }

    /// Lock timeout in whole minutes.
    pub fn timeout_minutes(&self) -> u32 {
        self.lock_timeout_ms / 60_000
    }
}

fn read_or(store: &dyn SettingsStore, key: SettingKey, default: u32) -> u32 {
    match store.read_value(key) {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!("{} not set, using default {}", key.as_str(), default);
            default
        }
        Err(e) => {
            warn!("Failed to read {}: {}. Using default {}", key.as_str(), e, default);
            default
        }
    }
}

/// Settings kept as integer entries in a flat TOML file.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Create a store backed by the given file. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default per-user location: `$XDG_CONFIG_HOME/idlelock/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("idlelock").join("settings.toml"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<Option<toml::Table>, SettingsError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let table = content
            .parse::<toml::Table>()
            .map_err(|e| SettingsError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        Ok(Some(table))
    }
}

impl SettingsStore for FileSettingsStore {
    fn read_value(&self, key: SettingKey) -> Result<Option<u32>, SettingsError> {
        let Some(table) = self.read_table()? else {
            return Ok(None);
        };

        let Some(value) = table.get(key.as_str()) else {
            return Ok(None);
        };

        let parsed = match value {
            toml::Value::Integer(i) => u32::try_from(*i).ok(),
            toml::Value::Boolean(b) => Some(u32::from(*b)),
            _ => None,
        };

        parsed
            .map(Some)
            .ok_or_else(|| SettingsError::InvalidValue {
                key: key.as_str(),
                value: value.to_string(),
            })
    }

    fn write_values(&mut self, values: &[(SettingKey, u32)]) -> Result<(), SettingsError> {
        // Keep unrelated entries; start over if the file is unreadable.
        let mut table = match self.read_table() {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                warn!("Overwriting unreadable settings file: {}", e);
                toml::Table::new()
            }
        };

        for (key, value) in values {
            table.insert(
                key.as_str().to_string(),
                toml::Value::Integer(i64::from(*value)),
            );
        }

        let content =
            toml::to_string(&table).map_err(|e| SettingsError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(&self.path, content).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!("Settings written to {}", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<SettingKey, u32>,
    writes: usize,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory settings store.
///
/// Clones share the same entries, so a test can keep a handle after moving
/// the store into an engine.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySettingsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with entries.
    pub fn with_values(values: &[(SettingKey, u32)]) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            inner.values.extend(values.iter().copied());
        }
        store
    }

    /// Current value of an entry.
    pub fn value(&self, key: SettingKey) -> Option<u32> {
        self.lock().values.get(&key).copied()
    }

    /// Number of successful `write_values` calls.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Make subsequent reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn read_value(&self, key: SettingKey) -> Result<Option<u32>, SettingsError> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(SettingsError::Parse {
                path: PathBuf::from("<memory>"),
                message: "read failure injected".to_string(),
            });
        }
        Ok(inner.values.get(&key).copied())
    }

    fn write_values(&mut self, values: &[(SettingKey, u32)]) -> Result<(), SettingsError> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(SettingsError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::other("write failure injected"),
            });
        }
        inner.values.extend(values.iter().copied());
        inner.writes += 1;
        Ok(())
    }
}
