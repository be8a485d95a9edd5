use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;
use crate::scheduler::LIVENESS_WINDOW_SECONDS;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_monitors_file")]
    pub monitors_file: String,

    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_seconds: u64,

    #[serde(default = "default_gateway_probe_timeout")]
    pub gateway_probe_timeout_seconds: u64,

    #[serde(default)]
    pub gateway_override: Option<IpAddr>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialEngineConfig {
    instance_name: Option<String>,
    log_dir: Option<String>,
    monitors_file: Option<String>,
    broadcast_capacity: Option<usize>,
    watchdog_interval_seconds: Option<u64>,
    gateway_probe_timeout_seconds: Option<u64>,
    gateway_override: Option<IpAddr>,
}

fn default_instance_name() -> String {
    "uptime-monitor".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_monitors_file() -> String {
    "monitors.toml".to_string()
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_watchdog_interval() -> u64 {
    30
}

fn default_gateway_probe_timeout() -> u64 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            log_dir: default_log_dir(),
            monitors_file: default_monitors_file(),
            broadcast_capacity: default_broadcast_capacity(),
            watchdog_interval_seconds: default_watchdog_interval(),
            gateway_probe_timeout_seconds: default_gateway_probe_timeout(),
            gateway_override: None,
        }
    }
}

impl EngineConfig {
    /// File values first, then `UPTIME_*` environment variables on top.
    pub fn load(config_path: Option<&str>) -> Result<Self, EngineError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) => Self::read_file(Path::new(path_str))?,
            None => PartialEngineConfig::default(),
        };

        let env_config: PartialEngineConfig = envy::prefixed("UPTIME_")
            .from_env()
            .map_err(|e| {
                EngineError::Config(format!("failed to load config from environment: {e}"))
            })?;

        let config = Self::merge(file_config, env_config);
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<PartialEngineConfig, EngineError> {
        if !path.exists() {
            return Ok(PartialEngineConfig::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read config file at {path:?}: {e}"))
        })?;
        toml::from_str(&contents).map_err(|e| {
            EngineError::Config(format!("failed to parse TOML from config file at {path:?}: {e}"))
        })
    }

    fn merge(file: PartialEngineConfig, env: PartialEngineConfig) -> Self {
        let defaults = Self::default();
        Self {
            instance_name: env
                .instance_name
                .or(file.instance_name)
                .unwrap_or(defaults.instance_name),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or(defaults.log_dir),
            monitors_file: env
                .monitors_file
                .or(file.monitors_file)
                .unwrap_or(defaults.monitors_file),
            broadcast_capacity: env
                .broadcast_capacity
                .or(file.broadcast_capacity)
                .unwrap_or(defaults.broadcast_capacity),
            watchdog_interval_seconds: env
                .watchdog_interval_seconds
                .or(file.watchdog_interval_seconds)
                .unwrap_or(defaults.watchdog_interval_seconds),
            gateway_probe_timeout_seconds: env
                .gateway_probe_timeout_seconds
                .or(file.gateway_probe_timeout_seconds)
                .unwrap_or(defaults.gateway_probe_timeout_seconds),
            gateway_override: env.gateway_override.or(file.gateway_override),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.watchdog_interval_seconds == 0 {
            return Err(EngineError::Config(
                "watchdog_interval_seconds must be positive".to_string(),
            ));
        }
        // The heartbeat must refresh within the liveness window.
        if self.watchdog_interval_seconds >= LIVENESS_WINDOW_SECONDS.unsigned_abs() {
            return Err(EngineError::Config(format!(
                "watchdog_interval_seconds must be less than {LIVENESS_WINDOW_SECONDS}"
            )));
        }
        if self.gateway_probe_timeout_seconds == 0 {
            return Err(EngineError::Config(
                "gateway_probe_timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_seconds)
    }

    pub fn gateway_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_probe_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn environment_overrides_file() {
        let file: PartialEngineConfig = toml::from_str(
            r#"
            instance_name = "from-file"
            monitors_file = "/etc/monitors.toml"
            watchdog_interval_seconds = 15
            "#,
        )
        .unwrap();
        let env = PartialEngineConfig {
            instance_name: Some("from-env".to_string()),
            ..Default::default()
        };

        let config = EngineConfig::merge(file, env);
        assert_eq!(config.instance_name, "from-env");
        assert_eq!(config.monitors_file, "/etc/monitors.toml");
        assert_eq!(config.watchdog_interval(), Duration::from_secs(15));
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let partial = EngineConfig::read_file(Path::new("/nonexistent/uptime.toml")).unwrap();
        let config = EngineConfig::merge(partial, PartialEngineConfig::default());
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "watchdog_interval_seconds = \"soon\"").unwrap();
        let result = EngineConfig::read_file(file.path());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn zero_watchdog_interval_is_rejected() {
        let config = EngineConfig {
            watchdog_interval_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn watchdog_interval_must_fit_liveness_window() {
        for seconds in [120, 121, u64::MAX] {
            let config = EngineConfig {
                watchdog_interval_seconds: seconds,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        }
        let config = EngineConfig {
            watchdog_interval_seconds: 119,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn gateway_override_parses_as_ip() {
        let file: PartialEngineConfig =
            toml::from_str(r#"gateway_override = "192.168.1.1""#).unwrap();
        let config = EngineConfig::merge(file, PartialEngineConfig::default());
        assert_eq!(config.gateway_override, Some("192.168.1.1".parse().unwrap()));
    }
}
