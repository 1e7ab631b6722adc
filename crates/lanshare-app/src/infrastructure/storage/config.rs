//! TOML-based configuration for the LanShare daemon.
//!
//! Reads and writes [`AppConfig`] in the platform-appropriate directory:
//! - Windows:  `%APPDATA%\LanShare\config.toml`
//! - Linux:    `~/.config/lanshare/config.toml`
//! - macOS:    `~/Library/Application Support/LanShare/config.toml`
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [lan]
//! port = 40818
//! listen = true
//! bind_address = "0.0.0.0"
//!
//! [lan.tls]
//! certificate = "/etc/lanshare/device.pem"
//! private_key = "/etc/lanshare/device.key"
//! trust_anchors = "/etc/lanshare/ca.pem"
//!
//! [[devices]]
//! uuid = "6f1c..."
//! name = "office-nas"
//! addresses = ["192.168.1.20"]
//! ```
//!
//! Every field has a `#[serde(default = ...)]` so a missing file or a file
//! written by an older version still loads.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use lanshare_lan::{TlsFiles, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

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

    /// `lan.bind_address` is not an IP address.
    #[error("invalid bind address {0:?}")]
    BindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub lan: LanConfig,
    /// Peers announced without discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<StaticDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LAN transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanConfig {
    /// TCP port peers listen on and outbound connections target.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether to accept inbound transfers.
    #[serde(default = "default_true")]
    pub listen: bool,
    /// Address to bind the listener to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Certificate material; absent means plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsFiles>,
}

/// A statically configured peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticDevice {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Overrides `lan.port` for this peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true() -> bool {
    true
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            listen: default_true(),
            bind_address: default_bind_address(),
            tls: None,
        }
    }
}

impl LanConfig {
    /// The socket address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BindAddress`] if `bind_address` does not parse.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for LanShare files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the default path of the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
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

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanShare"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanshare"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanShare")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
