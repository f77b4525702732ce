//! Runtime configuration shared by the publisher and subscriber.

use std::net::SocketAddr;
use std::time::Duration;

use fdl_core::{AppIdentity, AppName, Catalog, SIMM_CATALOG};
use fdl_protocol::{MpCountPolicy, SessionConfig, DEFAULT_ACK_TIMEOUT, REGISTRATION_BUDGET};

use crate::error::{AppError, Result};

pub const DEFAULT_PEER_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DATA_BIND: &str = "0.0.0.0:4097";
pub const DEFAULT_DATA_DEST: &str = "225.0.0.37:4096";
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(1000);

/// Configuration for one application process.
///
/// # Example
///
/// ```rust
/// use fdl_app::config::AppConfig;
/// use std::time::Duration;
///
/// let config = AppConfig {
///     publish_interval: Duration::from_millis(100),
///     ..AppConfig::default()
/// };
/// assert_eq!(config.catalog.family, "simm");
/// ```
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name this process registers under.
    pub app_name: AppName,

    /// Publisher: the catalog served. Subscriber: the catalog subscribed to.
    pub catalog: &'static Catalog,

    /// Manager control address, `host:port`.
    pub peer_addr: String,

    pub data_bind: SocketAddr,
    pub data_dest: SocketAddr,

    /// Publish tick and sampler refresh interval.
    pub publish_interval: Duration,

    pub ack_timeout: Duration,
    pub registration_budget: Duration,
    pub mp_count_policy: MpCountPolicy,

    /// Initial delay before retrying a refused connection.
    pub retry_initial_delay: Duration,

    /// Maximum delay between connection attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub retry_multiplier: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: AppName::from_bytes(*b"simm"),
            catalog: &SIMM_CATALOG,
            peer_addr: DEFAULT_PEER_ADDR.to_string(),
            data_bind: SocketAddr::from(([0, 0, 0, 0], 4097)),
            data_dest: SocketAddr::from(([225, 0, 0, 37], 4096)),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            registration_budget: REGISTRATION_BUDGET,
            mp_count_policy: MpCountPolicy::Strict,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            retry_multiplier: 2.0,
        }
    }
}

impl AppConfig {
    /// Looks up a catalog by family name.
    pub fn catalog_by_name(family: &str) -> Result<&'static Catalog> {
        Catalog::by_family(family).ok_or_else(|| AppError::UnknownCatalog(family.to_string()))
    }

    /// Parses `name` as an application name.
    pub fn parse_app_name(name: &str) -> Result<AppName> {
        name.parse()
            .map_err(|e| AppError::InvalidConfig(format!("app name: {e}")))
    }

    /// Parses a socket address argument.
    pub fn parse_addr(what: &str, value: &str) -> Result<SocketAddr> {
        value
            .parse()
            .map_err(|e| AppError::InvalidConfig(format!("{what} '{value}': {e}")))
    }

    pub fn identity(&self) -> AppIdentity {
        AppIdentity::current(self.app_name)
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(
            self.peer_addr.clone(),
            self.data_bind,
            self.data_dest,
            self.identity(),
            self.catalog,
        );
        config.ack_timeout = self.ack_timeout;
        config.mp_count_policy = self.mp_count_policy;
        config
    }
}
