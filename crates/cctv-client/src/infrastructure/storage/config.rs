//! TOML-based configuration persistence for the CCTV client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\CCTVMonitor\config.toml`
//! - Linux:    `~/.config/cctvmonitor/config.toml`
//! - macOS:    `~/Library/Application Support/CCTVMonitor/config.toml`
//!
//! Example file:
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! host = "192.168.0.81"
//! port = 8080
//! framing = "line_delimited_json"
//!
//! [connection]
//! auto_reconnect = true
//! max_reconnect_attempts = 5
//! reconnect_delay_ms = 3000
//!
//! [images]
//! quiet_period_ms = 2000
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so a missing file,
//! a missing section or a missing key all fall back to the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cctv_core::FramingMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::{Backoff, ChannelKind, ConnectionConfig, ReconnectConfig};

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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub images: ImageSettings,
}

/// Where the monitoring server listens and how it frames messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub framing: FramingMode,
}

/// Timeouts and reconnect behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

/// Where received and salvaged images go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Silence on a raw image channel before its bytes are salvaged.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "192.168.0.81".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_write_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_ms() -> u64 {
    3_000
}
fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("cctv-images")
}
fn default_quiet_period_ms() -> u64 {
    2_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            connection: ConnectionSettings::default(),
            images: ImageSettings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            framing: FramingMode::default(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            auto_reconnect: default_true(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            backoff: Backoff::default(),
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

impl AppConfig {
    /// Builds the runtime settings for a connection on `channel`.
    pub fn to_connection_config(&self, channel: ChannelKind) -> ConnectionConfig {
        ConnectionConfig {
            channel,
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.connection.write_timeout_ms),
            auto_reconnect: self.connection.auto_reconnect,
            reconnect: ReconnectConfig {
                max_attempts: self.connection.max_reconnect_attempts,
                delay: Duration::from_millis(self.connection.reconnect_delay_ms),
                backoff: self.connection.backoff,
            },
            salvage_dir: self.images.output_dir.clone(),
            quiet_period: Duration::from_millis(self.images.quiet_period_ms),
            ..ConnectionConfig::default()
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
fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_from_path(&config_file_path()?)
}

/// Loads `AppConfig` from an explicit path; a missing file yields the defaults.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_to_path(config, &config_file_path()?)
}

/// Writes `config` to `path`, creating parent directories as needed.
pub fn save_to_path(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
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

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CCTVMonitor"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("cctvmonitor"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("CCTVMonitor")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── AppConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_server_matches_deployment() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.server.host, "192.168.0.81");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.framing, FramingMode::LineDelimitedJson);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_connection_settings_defaults() {
        let cfg = ConnectionSettings::default();
        assert_eq!(cfg.connect_timeout_ms, 10_000);
        assert_eq!(cfg.write_timeout_ms, 5_000);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(cfg.reconnect_delay_ms, 3_000);
        assert_eq!(cfg.backoff, Backoff::Fixed);
    }

    // ── TOML round-trip ───────────────────────────────────────────────────────

    #[test]
    fn test_app_config_serializes_and_deserializes_round_trip() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.server.port = 9000;
        cfg.server.framing = FramingMode::LengthPrefixedBinary;
        cfg.connection.backoff = Backoff::Exponential {
            factor: 2.0,
            max_delay_ms: 30_000,
        };

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
        assert!(toml_str.contains("length_prefixed_binary"));
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_connection_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[connection]
max_reconnect_attempts = 2
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.connection.max_reconnect_attempts, 2);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.connection.reconnect_delay_ms, 3_000);
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Conversion ────────────────────────────────────────────────────────────

    #[test]
    fn test_to_connection_config_carries_durations() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.connection.reconnect_delay_ms = 250;
        cfg.connection.auto_reconnect = false;
        cfg.images.quiet_period_ms = 500;

        // Act
        let conn = cfg.to_connection_config(ChannelKind::ImageSalvage);

        // Assert
        assert_eq!(conn.channel, ChannelKind::ImageSalvage);
        assert_eq!(conn.reconnect.delay, Duration::from_millis(250));
        assert!(!conn.auto_reconnect);
        assert_eq!(conn.quiet_period, Duration::from_millis(500));
        assert_eq!(conn.salvage_dir, cfg.images.output_dir);
    }

    // ── load/save via temp directory ─────────────────────────────────────────

    #[test]
    fn test_load_from_path_returns_default_when_file_absent() {
        let dir = tempfile::tempdir().expect("tempdir");

        let cfg = load_from_path(&dir.path().join("missing.toml")).expect("load");

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        // Arrange
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.server.host = "10.0.0.5".to_string();
        cfg.log_level = "debug".to_string();

        // Act
        save_to_path(&cfg, &path).expect("save");
        let loaded = load_from_path(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_load_from_path_reports_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server = 5").unwrap();

        assert!(matches!(load_from_path(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
    }
}
