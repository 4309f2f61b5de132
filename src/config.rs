//! Settings store and mirror provider.
//!
//! Settings come from a TOML file (see [`default_config_path`]); every key is
//! optional. The running process shares them through [`SharedSettings`], which
//! the download core reads via the [`SettingsStore`] and [`MirrorProvider`]
//! seams so tests can substitute their own.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::download::constants::{
    DEFAULT_MOUNT_BINARY, DEFAULT_READ_AHEAD, MOUNT_READY_ATTEMPTS, MOUNT_READY_INTERVAL,
};

/// Errors from loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("mirror '{name}' config file not found: {}", path.display())]
    MirrorConfigMissing { name: String, path: PathBuf },
}

/// Public endpoint settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// Base URI the hashed item path is appended to.
    pub base_uri: Option<String>,
    /// Bearer credential sent to the endpoint.
    pub credential: Option<String>,
}

impl EndpointConfig {
    /// Returns `(base_uri, credential)` when both are set and non-blank.
    #[must_use]
    pub fn complete(&self) -> Option<(&str, &str)> {
        let base = self.base_uri.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let credential = self
            .credential
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        Some((base, credential))
    }
}

/// `[mirror]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorSettings {
    pub name: String,
    /// Remote name inside the mount utility's config file.
    pub remote_name: String,
    pub config_file: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Resolved mirror the orchestrator tries before the public endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDescriptor {
    pub name: String,
    pub config_file: PathBuf,
    pub remote_name: String,
}

/// `[mount]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountSettings {
    /// Directory listings tried before a mount counts as timed out.
    pub ready_attempts: u32,
    /// Pause between listings, in milliseconds.
    pub ready_interval_ms: u64,
    /// Read-ahead buffer size passed to the mount utility.
    pub read_ahead: String,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            ready_attempts: MOUNT_READY_ATTEMPTS,
            ready_interval_ms: u64::try_from(MOUNT_READY_INTERVAL.as_millis()).unwrap_or(1000),
            read_ahead: DEFAULT_READ_AHEAD.to_string(),
        }
    }
}

impl MountSettings {
    #[must_use]
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }
}

/// Full settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Items land in `<download_root>/<key>/`.
    pub download_root: PathBuf,
    /// Parent of the per-attempt mount points.
    pub mount_root: PathBuf,
    /// Speed cap in KB/s; 0 means unthrottled.
    pub speed_limit_kbps: u64,
    /// Mount utility name (looked up on `PATH`) or explicit path.
    pub mount_binary: String,
    pub endpoint: EndpointConfig,
    pub mirror: Option<MirrorSettings>,
    pub mount: MountSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("downloads"),
            mount_root: env::temp_dir().join("mountfetch-mounts"),
            speed_limit_kbps: 0,
            mount_binary: DEFAULT_MOUNT_BINARY.to_string(),
            endpoint: EndpointConfig::default(),
            mirror: None,
            mount: MountSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`], [`ConfigError::Parse`] or
    /// [`ConfigError::Invalid`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=600).contains(&self.mount.ready_attempts) {
            return Err(ConfigError::Invalid {
                field: "mount.ready_attempts",
                reason: format!("{} (expected 1..=600)", self.mount.ready_attempts),
            });
        }
        if self.mount.ready_interval_ms > 60_000 {
            return Err(ConfigError::Invalid {
                field: "mount.ready_interval_ms",
                reason: format!("{} (expected 0..=60000)", self.mount.ready_interval_ms),
            });
        }
        if self.mount.read_ahead.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "mount.read_ahead",
                reason: "must not be empty".to_string(),
            });
        }
        if self.mount_binary.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "mount_binary",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mountfetch/config.toml`
/// 2. `$HOME/.config/mountfetch/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("mountfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mountfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Read access to the settings the download core consumes.
pub trait SettingsStore: Send + Sync {
    fn download_root(&self) -> PathBuf;
    fn mount_root(&self) -> PathBuf;
    /// Current cap in KB/s; 0 means unthrottled.
    fn speed_limit_kbps(&self) -> u64;
    fn endpoint(&self) -> EndpointConfig;
    fn mount_binary(&self) -> String;
    fn mount_settings(&self) -> MountSettings;
}

/// Source of the optional active mirror.
pub trait MirrorProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a mirror is configured but unusable.
    fn active_mirror(&self) -> Result<Option<MirrorDescriptor>, ConfigError>;
}

/// Process-wide settings, readable concurrently and adjustable at runtime.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current settings.
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        self.read().clone()
    }

    /// Changes the speed cap; files started afterwards use the new value.
    pub fn set_speed_limit_kbps(&self, kbps: u64) {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        settings.speed_limit_kbps = kbps;
        debug!(kbps, "speed limit changed");
    }
}

impl SettingsStore for SharedSettings {
    fn download_root(&self) -> PathBuf {
        self.read().download_root.clone()
    }

    fn mount_root(&self) -> PathBuf {
        self.read().mount_root.clone()
    }

    fn speed_limit_kbps(&self) -> u64 {
        self.read().speed_limit_kbps
    }

    fn endpoint(&self) -> EndpointConfig {
        self.read().endpoint.clone()
    }

    fn mount_binary(&self) -> String {
        self.read().mount_binary.clone()
    }

    fn mount_settings(&self) -> MountSettings {
        self.read().mount.clone()
    }
}

impl MirrorProvider for SharedSettings {
    fn active_mirror(&self) -> Result<Option<MirrorDescriptor>, ConfigError> {
        let Some(mirror) = self.read().mirror.clone() else {
            return Ok(None);
        };
        if !mirror.enabled {
            return Ok(None);
        }
        if !mirror.config_file.is_file() {
            return Err(ConfigError::MirrorConfigMissing {
                name: mirror.name,
                path: mirror.config_file,
            });
        }
        Ok(Some(MirrorDescriptor {
            name: mirror.name,
            config_file: mirror.config_file,
            remote_name: mirror.remote_name,
        }))
    }
}
