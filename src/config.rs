//! Configuration.
//!
//! Loads YAML from cascading search paths; the first file found wins:
//! 1. `./sparkle.yaml` (current directory)
//! 2. `~/.config/sparkle/sparkle.yaml`
//!
//! Every field has a default, so a missing config file means a node
//! with stock settings. Timing bounds live here so tests can shrink
//! them without touching protocol code.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "sparkle.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Node-level settings (`node.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local address the UDP socket binds to.
    #[serde(default = "default_bind")]
    pub bind: Ipv4Addr,

    /// UDP port. Port 0 binds ephemeral.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Network divisor D: the overlay targets at least 1/D masters.
    /// Meaningful only when creating a network; joiners adopt the
    /// creator's value.
    #[serde(default = "default_divisor")]
    pub network_divisor: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            network_divisor: default_divisor(),
        }
    }
}

fn default_bind() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_port() -> u16 {
    1801
}

fn default_divisor() -> u8 {
    10
}

/// Identity settings (`identity.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the host RSA key file (PKCS#8 PEM). Generated there if
    /// missing. Defaults to `~/.sparkle/rsa_key.pem`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    /// RSA modulus length for generated keys.
    #[serde(default = "default_key_length")]
    pub key_length: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            key_length: default_key_length(),
        }
    }
}

fn default_key_length() -> usize {
    1024
}

impl IdentityConfig {
    /// Resolve the key file path, defaulting under the home directory.
    pub fn key_file_path(&self) -> PathBuf {
        if let Some(path) = &self.key_file {
            return path.clone();
        }
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".sparkle").join("rsa_key.pem")
    }
}

/// Protocol timing bounds (`timing.*`), all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Per-join-step timeout.
    #[serde(default = "default_step_ms")]
    pub join_timeout_ms: u64,

    /// Window to collect NAT-probe pings.
    #[serde(default = "default_step_ms")]
    pub ping_timeout_ms: u64,

    /// Per-peer handshake timeout.
    #[serde(default = "default_step_ms")]
    pub negotiation_timeout_ms: u64,

    /// Event-loop tick driving deadline checks.
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_step_ms(),
            ping_timeout_ms: default_step_ms(),
            negotiation_timeout_ms: default_step_ms(),
            tick_interval_ms: default_tick_ms(),
        }
    }
}

fn default_step_ms() -> u64 {
    5000
}

fn default_tick_ms() -> u64 {
    100
}

impl TimingConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node settings (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Identity settings (`identity.*`).
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Timing bounds (`timing.*`).
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard search paths in priority order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILENAME)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("sparkle").join(CONFIG_FILENAME));
        }
        paths
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns the parsed config and the path it came from, or defaults
    /// when no file exists.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::search_paths() {
            if path.exists() {
                return Ok((Self::load_file(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Load configuration from a specific file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&text).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
