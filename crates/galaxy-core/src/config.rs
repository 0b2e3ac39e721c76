//! galaxy.toml client configuration.
//!
//! Resolution order, later wins: built-in defaults, `~/.galaxy/galaxy.toml`,
//! `GALAXY_*` environment variables, command-line flags (applied by the
//! binary).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default address of the shared registry store.
pub const DEFAULT_REGISTRY: &str = "127.0.0.1:6379";

/// Default registration TTL in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Default backend network timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GalaxyConfig {
    /// host:port of the shared key-value store. Several comma-separated
    /// addresses are tried in order.
    pub registry: String,
    pub env: Option<String>,
    pub pool: Option<String>,
    /// Registration time-to-live, in seconds.
    pub ttl: u64,
    /// Network timeout for every backend call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GalaxyConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            env: None,
            pool: None,
            ttl: DEFAULT_TTL_SECS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl GalaxyConfig {
    /// `$HOME/.galaxy/galaxy.toml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(|home| PathBuf::from(home).join(".galaxy").join("galaxy.toml"))
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GalaxyConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the default location) and apply the process
    /// environment. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(&p)?,
            _ => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `GALAXY_REGISTRY`, `GALAXY_ENV`, `GALAXY_POOL` and `GALAXY_TTL`
    /// from the given variables. Empty values are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "GALAXY_REGISTRY" => self.registry = value,
                "GALAXY_ENV" => self.env = Some(value),
                "GALAXY_POOL" => self.pool = Some(value),
                "GALAXY_TTL" => {
                    self.ttl = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "GALAXY_TTL",
                        value: value.clone(),
                    })?;
                }
                _ => {}
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.ttl == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ttl",
                value: self.ttl.to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout_ms",
                value: self.timeout_ms.to_string(),
            });
        }
        // host:port[,host:port,..]
        let well_formed = self.registry.split(',').all(|entry| {
            entry
                .trim()
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        });
        if !well_formed {
            return Err(ConfigError::InvalidValue {
                key: "registry",
                value: self.registry.clone(),
            });
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
