//! Daemon configuration.
//!
//! ```yaml
//! interfaces: [eth0]
//! backends: [203.0.113.9, "2001:db8::9"]
//! metrics:
//!   listen: "[::]:9994"
//! log_level: info
//! ```

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::Backends;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_METRICS_LISTEN: &str = "[::]:9994";
const DEFAULT_LOG_LEVEL: &str = "info";

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

    #[error("unable to parse backend IP '{value}': {source}")]
    InvalidBackend {
        value: String,
        source: AddrParseError,
    },

    #[error("no interfaces configured")]
    NoInterfaces,
}

/// Metrics endpoint settings (`metrics.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interfaces to capture on.
    pub interfaces: Vec<String>,

    /// Backend addresses as written in the file.
    #[serde(default)]
    pub backends: Vec<String>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Default tracing filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(skip)]
    parsed_backends: Backends,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source: e,
            })?;

        if config.interfaces.is_empty() {
            return Err(ConfigError::NoInterfaces);
        }

        config.parsed_backends = config
            .backends
            .iter()
            .map(|b| {
                b.trim()
                    .parse::<IpAddr>()
                    .map_err(|e| ConfigError::InvalidBackend {
                        value: b.clone(),
                        source: e,
                    })
            })
            .collect::<Result<Backends, _>>()?;

        Ok(config)
    }

    /// The validated backends, split by family.
    pub fn backends(&self) -> &Backends {
        &self.parsed_backends
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    DEFAULT_METRICS_LISTEN
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 9994)))
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
