//! TOML-based configuration persistence for the host.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\MarlinLink\config.toml`
//! - Linux:    `~/.config/marlinlink/config.toml`
//! - macOS:    `~/Library/Application Support/MarlinLink/config.toml`
//!
//! A different file can be named on the command line.
//!
//! # Example file
//!
//! ```toml
//! [channel]
//! window_size = 20
//! retention_window = 250
//! probe_timeout_ms = 2000
//!
//! [connection]
//! kind = "serial"
//! serial_port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [[joints]]
//! name = "X"
//! home = 0.0
//!
//! [[joints]]
//! name = "Y"
//! home = 270.0
//! ```
//!
//! Every field has a default (via `#[serde(default = "...")]`), so a missing
//! file or a file with only some sections still produces a usable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use marlin_core::Joint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::channel::ChannelConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parsed but make no sense together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub channel: ChannelSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default = "default_joints")]
    pub joints: Vec<Joint>,
}

/// Protocol tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelSettings {
    /// Commands in flight before an `ok` is required.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Lines kept behind the send cursor for `Resend:` requests.
    #[serde(default = "default_retention_window")]
    pub retention_window: usize,
    /// Silence before the keepalive probe is sent.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Period of the liveness check.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_true")]
    pub home_on_connect: bool,
    #[serde(default = "default_home_delay_ms")]
    pub home_delay_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which transport to open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Tcp,
    Serial,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    #[serde(default = "default_kind")]
    pub kind: ConnectionKind,
    /// Host of a TCP serial bridge.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`.
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_window_size() -> usize {
    20
}
fn default_retention_window() -> usize {
    250
}
fn default_probe_timeout_ms() -> u64 {
    2_000
}
fn default_probe_interval_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_home_delay_ms() -> u64 {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_kind() -> ConnectionKind {
    ConnectionKind::Tcp
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    23
}
fn default_serial_port() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    57_600
}

/// Six-axis arm with the usual rest pose.
fn default_joints() -> Vec<Joint> {
    [("X", 0.0), ("Y", 270.0), ("Z", 0.0), ("U", 270.0), ("V", 180.0), ("W", 0.0)]
        .into_iter()
        .map(|(name, home)| Joint::new(name, home, home))
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: ChannelSettings::default(),
            connection: ConnectionSettings::default(),
            joints: default_joints(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            retention_window: default_retention_window(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            home_on_connect: default_true(),
            home_delay_ms: default_home_delay_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            host: default_host(),
            port: default_port(),
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl AppConfig {
    /// Rejects combinations the channel cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let channel = &self.channel;
        if channel.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be at least 1".into()));
        }
        if channel.retention_window < channel.window_size {
            return Err(ConfigError::Invalid(format!(
                "retention_window ({}) must be at least window_size ({})",
                channel.retention_window, channel.window_size
            )));
        }
        if channel.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid("probe_interval_ms must be positive".into()));
        }
        if self.joints.is_empty() {
            return Err(ConfigError::Invalid("at least one joint is required".into()));
        }
        if let Some(joint) = self.joints.iter().find(|j| j.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "joint names must not be empty (home {})",
                joint.home
            )));
        }
        Ok(())
    }

    /// Channel tunables in the form the actor takes.
    pub fn channel_config(&self) -> ChannelConfig {
        let c = &self.channel;
        ChannelConfig {
            window_size: c.window_size,
            retention_window: c.retention_window,
            probe_timeout: Duration::from_millis(c.probe_timeout_ms),
            probe_interval: Duration::from_millis(c.probe_interval_ms),
            home_on_connect: c.home_on_connect,
            home_delay: Duration::from_millis(c.home_delay_ms),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `MarlinLink`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MarlinLink"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("marlinlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MarlinLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
