//! Configuration module for AutoCloud.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{PathFilter, DEFAULT_MAX_DEPTH, HIDDEN_METADATA_NAME};
use crate::ports::RemoteCredentials;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for AutoCloud.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Folder on the remote store that receives the watched folders.
    pub root_folder: String,
    /// Local mount point of the remote share.
    pub mount_point: PathBuf,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
}

/// Local folders to mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Absolute paths of the folders to mirror. Each lands under
    /// `remote.root_folder` by its final path component.
    pub watched_folders: Vec<PathBuf>,
    /// Absolute prefixes, or bare folder names, that are never synced.
    pub excluded_folders: Vec<PathBuf>,
    /// File names that are never synced anywhere in the tree.
    pub hidden_names: Vec<String>,
}

/// Mirror cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the remote mirror snapshot.
    pub dir: PathBuf,
}

/// How the local index is refreshed each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalRefreshMode {
    /// Rebuild the whole local index from disk every cycle.
    FullScan,
    /// Apply watcher events and rescan only folders flagged for update.
    #[default]
    Watch,
}

/// Synchronization loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between reconciliation cycles.
    pub update_frequency: u64,
    /// Recursion limit for directory walks.
    pub max_depth: usize,
    /// Seconds to wait between failed connection attempts.
    pub reconnect_delay: u64,
    /// Seconds a cycle may spend connecting before it is abandoned (0 waits forever).
    pub connect_timeout: u64,
    pub local_refresh: LocalRefreshMode,
    /// Rebuild the mirror from a full remote listing every N cycles (0 never).
    pub remote_relist_cycles: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/autocloud/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("autocloud")
            .join("config.yaml")
    }
}

impl RemoteConfig {
    /// Session parameters handed to the remote storage adapter.
    pub fn credentials(&self) -> RemoteCredentials {
        RemoteCredentials {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            private_key: self.private_key.clone(),
        }
    }
}

impl LocalConfig {
    /// Exclusion rules built from `hidden_names` and `excluded_folders`.
    pub fn path_filter(&self) -> PathFilter {
        PathFilter::new(self.hidden_names.clone(), self.excluded_folders.clone())
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root_folder: "/AutoCloud".to_string(),
            mount_point: PathBuf::from("/mnt/autocloud"),
            host: "localhost".to_string(),
            port: 22,
            username: String::new(),
            password: None,
            private_key: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            watched_folders: Vec::new(),
            excluded_folders: Vec::new(),
            hidden_names: vec![HIDDEN_METADATA_NAME.to_string()],
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("autocloud"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_frequency: 60,
            max_depth: DEFAULT_MAX_DEPTH,
            reconnect_delay: 15,
            connect_timeout: 0,
            local_refresh: LocalRefreshMode::default(),
            remote_relist_cycles: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.update_frequency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Upper bound accepted for `sync.max_depth`.
const MAX_DEPTH_LIMIT: usize = 256;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- remote ---
        if !self.remote.root_folder.starts_with('/') {
            errors.push(ValidationError {
                field: "remote.root_folder".into(),
                message: format!("must be an absolute path: {}", self.remote.root_folder),
            });
        }
        if !self.remote.mount_point.is_absolute() {
            errors.push(ValidationError {
                field: "remote.mount_point".into(),
                message: format!(
                    "must be an absolute path: {}",
                    self.remote.mount_point.display()
                ),
            });
        }
        if self.remote.port == 0 {
            errors.push(ValidationError {
                field: "remote.port".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- local ---
        if self.local.watched_folders.is_empty() {
            errors.push(ValidationError {
                field: "local.watched_folders".into(),
                message: "at least one folder is required".into(),
            });
        }
        let mut names = HashSet::new();
        for folder in &self.local.watched_folders {
            if !folder.is_absolute() {
                errors.push(ValidationError {
                    field: "local.watched_folders".into(),
                    message: format!("must be an absolute path: {}", folder.display()),
                });
                continue;
            }
            match folder.file_name() {
                Some(name) if !names.insert(name.to_os_string()) => {
                    errors.push(ValidationError {
                        field: "local.watched_folders".into(),
                        message: format!(
                            "two folders share the name '{}'",
                            name.to_string_lossy()
                        ),
                    });
                }
                Some(_) => {}
                None => errors.push(ValidationError {
                    field: "local.watched_folders".into(),
                    message: format!("folder has no name: {}", folder.display()),
                }),
            }
        }

        // --- cache ---
        if self.cache.dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "cache.dir".into(),
                message: "must not be empty".into(),
            });
        }

        // --- sync ---
        if self.sync.update_frequency == 0 {
            errors.push(ValidationError {
                field: "sync.update_frequency".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.reconnect_delay == 0 {
            errors.push(ValidationError {
                field: "sync.reconnect_delay".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_depth == 0 || self.sync.max_depth > MAX_DEPTH_LIMIT {
            errors.push(ValidationError {
                field: "sync.max_depth".into(),
                message: format!("must be in range 1..={MAX_DEPTH_LIMIT}"),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use autocloud_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .watch_folder(PathBuf::from("/home/user/Documents"))
///     .update_frequency(30)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- remote ---

    pub fn remote_root_folder(mut self, root: impl Into<String>) -> Self {
        self.config.remote.root_folder = root.into();
        self
    }

    pub fn remote_mount_point(mut self, mount_point: PathBuf) -> Self {
        self.config.remote.mount_point = mount_point;
        self
    }

    pub fn remote_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.remote.host = host.into();
        self.config.remote.port = port;
        self
    }

    pub fn remote_username(mut self, username: impl Into<String>) -> Self {
        self.config.remote.username = username.into();
        self
    }

    // --- local ---

    pub fn watch_folder(mut self, folder: PathBuf) -> Self {
        self.config.local.watched_folders.push(folder);
        self
    }

    pub fn exclude_folder(mut self, folder: PathBuf) -> Self {
        self.config.local.excluded_folders.push(folder);
        self
    }

    pub fn hidden_name(mut self, name: impl Into<String>) -> Self {
        self.config.local.hidden_names.push(name.into());
        self
    }

    // --- cache ---

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.cache.dir = dir;
        self
    }

    // --- sync ---

    pub fn update_frequency(mut self, seconds: u64) -> Self {
        self.config.sync.update_frequency = seconds;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.sync.max_depth = depth;
        self
    }

    pub fn reconnect_delay(mut self, seconds: u64) -> Self {
        self.config.sync.reconnect_delay = seconds;
        self
    }

    pub fn connect_timeout(mut self, seconds: u64) -> Self {
        self.config.sync.connect_timeout = seconds;
        self
    }

    pub fn local_refresh(mut self, mode: LocalRefreshMode) -> Self {
        self.config.sync.local_refresh = mode;
        self
    }

    pub fn remote_relist_cycles(mut self, cycles: u32) -> Self {
        self.config.sync.remote_relist_cycles = cycles;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
