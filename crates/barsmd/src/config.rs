//! Supervisor configuration.
//!
//! Loaded from an optional TOML file. Every key has a default, so an empty
//! file (or no file at all) gives the stock deployment layout.
//!
//! ```toml
//! watch_dirs = ["/opt/rc360/system/", "/opt/rc360/apps/GE/"]
//! aacm_addr = "127.0.0.1:8000"
//!
//! [launch]
//! max_attempts = 5
//! check_period_ms = 5000
//! ```

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Env var naming the config file when `--config` is not given.
pub const CONFIG_ENV: &str = "BARSM_CONFIG";

/// Env var overriding `aacm_addr`.
pub const AACM_ADDR_ENV: &str = "BARSM_AACM_ADDR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Bounded retry policy for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchPolicy {
    /// Spawns allowed before the child is disabled.
    pub max_attempts: u32,
    /// Pause between liveness checks.
    pub check_period_ms: u64,
    /// Run time after which a child counts as started, and the final
    /// settle delay before the verdict.
    pub start_ensure_delay_ms: u64,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            check_period_ms: 5000,
            start_ensure_delay_ms: 4000,
        }
    }
}

impl LaunchPolicy {
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms)
    }

    pub fn start_ensure_delay(&self) -> Duration {
        Duration::from_millis(self.start_ensure_delay_ms)
    }
}

/// Resource limits for the fleet monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorThresholds {
    pub memory_mb: u64,
    pub cpu_percent: f32,
    pub interval_secs: u64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            cpu_percent: 90.0,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Launch order. The first directory holds the manager (AACM).
    pub watch_dirs: Vec<PathBuf>,
    /// Manager control address.
    pub aacm_addr: String,
    pub data_bind: SocketAddr,
    pub data_dest: SocketAddr,
    pub check_interval_secs: u64,
    pub launch: LaunchPolicy,
    pub bridge_enabled: bool,
    /// Pause after the manager launch before the bridge connects.
    pub bridge_start_delay_ms: u64,
    pub monitor: MonitorThresholds,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watch_dirs: [
                "/opt/rc360/system/",
                "/opt/rc360/modules/GE/",
                "/opt/rc360/modules/TPA/",
                "/opt/rc360/apps/GE/",
                "/opt/rc360/apps/TPA/",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            aacm_addr: "127.0.0.1:8000".to_string(),
            data_bind: SocketAddr::from(([0, 0, 0, 0], 4097)),
            data_dest: SocketAddr::from(([225, 0, 0, 37], 4096)),
            check_interval_secs: 60,
            launch: LaunchPolicy::default(),
            bridge_enabled: true,
            bridge_start_delay_ms: 1000,
            monitor: MonitorThresholds::default(),
        }
    }
}

impl SupervisorConfig {
    /// Loads configuration from `path`, else from `$BARSM_CONFIG`, else defaults,
    /// then applies env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let config = Self::from_toml_str(&text)
                    .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };

        if let Ok(addr) = env::var(AACM_ADDR_ENV) {
            debug!(addr = %addr, "Manager address overridden from environment");
            config.aacm_addr = addr;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_dirs.is_empty() {
            return Err(ConfigError::Invalid("watch_dirs is empty".to_string()));
        }
        if self.launch.max_attempts == 0 {
            return Err(ConfigError::Invalid("launch.max_attempts must be at least 1".to_string()));
        }
        if self.launch.check_period_ms == 0 {
            return Err(ConfigError::Invalid("launch.check_period_ms must be at least 1".to_string()));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid("check_interval_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Directory holding the manager.
    pub fn aacm_dir(&self) -> Option<&Path> {
        self.watch_dirs.first().map(PathBuf::as_path)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn bridge_start_delay(&self) -> Duration {
        Duration::from_millis(self.bridge_start_delay_ms)
    }
}
