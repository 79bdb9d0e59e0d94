//! Configuration types for the fleet coordinator.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FleetError, FleetResult};

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "HALYARD_FLEET_CONFIG";

/// Fleet coordinator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// HTTP API configuration.
    pub api: ApiConfig,
    /// Scheduler loop configuration.
    pub coordinator: CoordinatorConfig,
    /// Worker defaults.
    pub workers: WorkerConfig,
    /// Per-domain database pool configuration.
    pub database: DatabaseConfig,
    /// Domain configuration source.
    pub domains: DomainsConfig,
}

impl FleetConfig {
    /// Load configuration from the default sources.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `fleet.toml`, or the file named by `HALYARD_FLEET_CONFIG`
    /// 3. Environment variables with the `HALYARD_FLEET_` prefix
    pub fn load() -> FleetResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from("fleet.toml"), PathBuf::from);
        Self::from_file(path)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> FleetResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HALYARD_FLEET_").split("__"))
            .extract()
            .map_err(|e| FleetError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the coordinator cannot run with.
    pub fn validate(&self) -> FleetResult<()> {
        self.coordinator.validate()?;
        if self.workers.default_timeout.is_zero() {
            return Err(FleetError::config("workers.default_timeout must be non-zero"));
        }
        if self.database.max_connections == 0 {
            return Err(FleetError::config("database.max_connections must be non-zero"));
        }
        Ok(())
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8095),
        }
    }
}

/// Scheduler loop configuration.
///
/// The sweep and refresh cadences are independent; neither is derived
/// from the other.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Interval between liveness sweeps.
    #[serde(with = "serde_duration_secs")]
    pub sweep_interval: Duration,
    /// Interval between program cache refreshes.
    #[serde(with = "serde_duration_secs")]
    pub refresh_interval: Duration,
    /// Capacity of the error channel handed to the process owner.
    pub error_channel_capacity: usize,
}

impl CoordinatorConfig {
    /// Rejects zero intervals and a zero-capacity error channel.
    pub fn validate(&self) -> FleetResult<()> {
        if self.sweep_interval.is_zero() {
            return Err(FleetError::config("coordinator.sweep_interval must be non-zero"));
        }
        if self.refresh_interval.is_zero() {
            return Err(FleetError::config(
                "coordinator.refresh_interval must be non-zero",
            ));
        }
        if self.error_channel_capacity == 0 {
            return Err(FleetError::config(
                "coordinator.error_channel_capacity must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(60),
            error_channel_capacity: 64,
        }
    }
}

/// Worker defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Liveness timeout applied when a registration does not carry one.
    #[serde(with = "serde_duration_secs")]
    pub default_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
        }
    }
}

/// Per-domain database pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum connections in each domain's pool.
    pub max_connections: u32,
    /// Timeout for establishing a connection.
    #[serde(with = "serde_duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Domain configuration source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DomainsConfig {
    /// YAML or TOML file with a top-level `domains` table.
    pub file: Option<PathBuf>,
    /// Reload the file when it changes.
    pub watch: bool,
    /// Debounce window for file change events, in milliseconds.
    pub debounce_ms: u64,
    /// Domains declared inline, used when no file is configured.
    pub inline: BTreeMap<String, String>,
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            file: None,
            watch: true,
            debounce_ms: 500,
            inline: BTreeMap::new(),
        }
    }
}

impl DomainsConfig {
    /// Resolves the domain file against the standard search path.
    ///
    /// Absolute paths are used as-is. Relative paths are tried in the
    /// working directory, `$HOME/.config/halyard` and `/etc/halyard`, in
    /// that order; if none exists the path is returned unchanged so the
    /// subsequent load reports it.
    pub fn resolve_file(&self) -> Option<PathBuf> {
        let file = self.file.as_ref()?;
        if file.is_absolute() {
            return Some(file.clone());
        }

        let mut candidates = vec![PathBuf::from(".")];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".config").join("halyard"));
        }
        candidates.push(PathBuf::from("/etc/halyard"));

        candidates
            .into_iter()
            .map(|dir| dir.join(file))
            .find(|path| path.is_file())
            .or_else(|| Some(file.clone()))
    }

    /// Debounce window as a duration.
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.api.listen_addr.port(), 8095);
        assert_eq!(config.coordinator.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.coordinator.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.workers.default_timeout, Duration::from_secs(15));
        assert!(config.domains.file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [coordinator]
            sweep_interval = 2
            refresh_interval = 30

            [domains]
            watch = false

            [domains.inline]
            tenant-a = "postgres://db-a/selfhost"
        "#;

        let config: FleetConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.coordinator.sweep_interval, Duration::from_secs(2));
        assert_eq!(config.coordinator.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.coordinator.error_channel_capacity, 64);
        assert!(!config.domains.watch);
        assert_eq!(
            config.domains.inline.get("tenant-a").map(String::as_str),
            Some("postgres://db-a/selfhost")
        );
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = FleetConfig::default();
        config.coordinator.sweep_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(FleetError::Config(_))));

        let mut config = FleetConfig::default();
        config.coordinator.error_channel_capacity = 0;
        assert!(matches!(config.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn absolute_domain_file_is_kept() {
        let config = DomainsConfig {
            file: Some(PathBuf::from("/srv/halyard/domains.yaml")),
            ..DomainsConfig::default()
        };
        assert_eq!(
            config.resolve_file(),
            Some(PathBuf::from("/srv/halyard/domains.yaml"))
        );
        assert!(DomainsConfig::default().resolve_file().is_none());
    }
}
