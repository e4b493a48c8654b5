//! YAML configuration for the `scale2zero` daemon.
//!
//! Intervals are expressed in whole seconds. Every section has working
//! defaults so a minimal config only needs the endpoints:
//!
//! ```yaml
//! store:
//!   path: /var/lib/scale2zero/store.redb
//! platform:
//!   api_url: http://cloud-controller.internal:9022
//!   routing_api_url: http://routing-api.internal:3000
//! nozzle:
//!   egress_addr: http://egress.internal:8088
//! route_listener:
//!   ip: 10.0.1.17
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Consumer-group id under which all nozzles subscribe, so the stream
/// load-balances envelopes across them.
pub const DEFAULT_SHARD_ID: &str = "SCALE_TO_ZERO";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter level: "error", "warn", "info", "debug", "trace".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/scale2zero/store.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the platform control plane.
    pub api_url: String,
    /// Base URL of the routing API.
    pub routing_api_url: String,
    /// Optional bearer token sent with every platform request.
    pub auth_token: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            routing_api_url: String::new(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NozzleConfig {
    /// Parallel stream consumers.
    pub count: usize,
    pub shard_id: String,
    /// Egress stream endpoint.
    pub egress_addr: String,
}

impl Default for NozzleConfig {
    fn default() -> Self {
        Self {
            count: 3,
            shard_id: DEFAULT_SHARD_ID.to_string(),
            egress_addr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often the in-memory enrollment map is reloaded from the store.
    pub app_refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            app_refresh_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub evaluation_interval_secs: u64,
    pub app_refresh_interval_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 30,
            app_refresh_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingEngineConfig {
    /// Number of lock stripes for per-app serialization.
    pub lock_size: usize,
    /// How long start/stop polls for confirmation before giving up.
    pub start_stop_deadline_secs: u64,
}

impl Default for ScalingEngineConfig {
    fn default() -> Self {
        Self {
            lock_size: 32,
            start_stop_deadline_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteManagerConfig {
    pub send_route_interval_secs: u64,
    pub refresh_app_route_interval_secs: u64,
}

impl Default for RouteManagerConfig {
    fn default() -> Self {
        Self {
            send_route_interval_secs: 30,
            refresh_app_route_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteEmitterConfig {
    pub flush_interval_secs: u64,
}

impl Default for RouteEmitterConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteListenerConfig {
    /// Address advertised in emitted catch routes; must be reachable by
    /// the platform's router.
    pub ip: String,
    pub port: u16,
}

impl Default for RouteListenerConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub api_server: ApiServerConfig,
    pub platform: PlatformConfig,
    pub nozzle: NozzleConfig,
    pub registry: RegistryConfig,
    pub aggregator: AggregatorConfig,
    pub scaling_engine: ScalingEngineConfig,
    pub route_manager: RouteManagerConfig,
    pub route_emitter: RouteEmitterConfig,
    pub route_listener: RouteListenerConfig,
    pub envelope_chan_size: usize,
    pub trigger_chan_size: usize,
    pub route_chan_size: usize,
    pub trigger_worker_count: usize,
    pub cool_down_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
            api_server: ApiServerConfig::default(),
            platform: PlatformConfig::default(),
            nozzle: NozzleConfig::default(),
            registry: RegistryConfig::default(),
            aggregator: AggregatorConfig::default(),
            scaling_engine: ScalingEngineConfig::default(),
            route_manager: RouteManagerConfig::default(),
            route_emitter: RouteEmitterConfig::default(),
            route_listener: RouteListenerConfig::default(),
            envelope_chan_size: 500,
            trigger_chan_size: 100,
            route_chan_size: 500,
            trigger_worker_count: 3,
            cool_down_secs: 600,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would stall or wedge the control loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn require(cond: bool, what: &str) -> Result<(), ConfigError> {
            if cond {
                Ok(())
            } else {
                Err(ConfigError::Invalid(what.to_string()))
            }
        }

        require(!self.platform.api_url.is_empty(), "platform.api_url is required")?;
        require(
            !self.platform.routing_api_url.is_empty(),
            "platform.routing_api_url is required",
        )?;
        require(!self.nozzle.egress_addr.is_empty(), "nozzle.egress_addr is required")?;
        require(self.nozzle.count > 0, "nozzle.count must be positive")?;
        require(
            self.trigger_worker_count > 0,
            "trigger_worker_count must be positive",
        )?;
        require(self.envelope_chan_size > 0, "envelope_chan_size must be positive")?;
        require(self.trigger_chan_size > 0, "trigger_chan_size must be positive")?;
        require(self.route_chan_size > 0, "route_chan_size must be positive")?;
        require(self.scaling_engine.lock_size > 0, "scaling_engine.lock_size must be positive")?;
        require(
            self.scaling_engine.start_stop_deadline_secs > 0,
            "scaling_engine.start_stop_deadline_secs must be positive",
        )?;
        require(
            self.aggregator.evaluation_interval_secs > 0,
            "aggregator.evaluation_interval_secs must be positive",
        )?;
        require(
            self.aggregator.app_refresh_interval_secs > 0,
            "aggregator.app_refresh_interval_secs must be positive",
        )?;
        require(
            self.registry.app_refresh_interval_secs > 0,
            "registry.app_refresh_interval_secs must be positive",
        )?;
        require(
            self.route_manager.send_route_interval_secs > 0,
            "route_manager.send_route_interval_secs must be positive",
        )?;
        require(
            self.route_manager.refresh_app_route_interval_secs > 0,
            "route_manager.refresh_app_route_interval_secs must be positive",
        )?;
        require(
            self.route_emitter.flush_interval_secs > 0,
            "route_emitter.flush_interval_secs must be positive",
        )?;
        require(self.api_server.port != 0, "api_server.port must be nonzero")?;
        require(self.route_listener.port != 0, "route_listener.port must be nonzero")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_yaml() -> &'static str {
        r#"
store:
  path: /tmp/scale2zero-test.redb
platform:
  api_url: http://cc.internal:9022
  routing_api_url: http://routing.internal:3000
nozzle:
  egress_addr: http://egress.internal:8088
"#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.nozzle.count, 3);
        assert_eq!(config.nozzle.shard_id, DEFAULT_SHARD_ID);
        assert_eq!(config.cool_down_secs, 600);
        assert_eq!(config.scaling_engine.start_stop_deadline_secs, 120);
        assert_eq!(config.route_listener.port, 8081);
    }

    #[test]
    fn from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_yaml().as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.platform.api_url, "http://cc.internal:9022");
    }

    #[test]
    fn missing_endpoints_rejected() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_counts_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.nozzle.count = 0;
        assert!(config.validate().is_err());

        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.trigger_chan_size = 0;
        assert!(config.validate().is_err());

        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.scaling_engine.lock_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unreadable_file_is_a_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/scale2zero.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
