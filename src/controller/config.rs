use std::fs;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::window::TimeParseError;

/// Well-known configuration file, read from the working directory.
pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_MONITOR_INTERVAL_SECONDS: i64 = 10;
const DEFAULT_POWER_UPDATE_INTERVAL_MINUTES: i64 = 10;
const DEFAULT_MODE_CHANGE_INHIBIT_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("'target_ip' is missing or not a valid IP address: '{0}'")]
    InvalidTargetIp(String),

    #[error(transparent)]
    Time(#[from] TimeParseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub target_ip: String,
    #[serde(default)]
    pub monitor_interval_seconds: i64,
    pub charge_window_start: String,
    pub charge_window_end: String,
    #[serde(default)]
    pub charge_power_update_interval_minutes: i64,
    #[serde(default)]
    pub auto_mode_threshold_watts: i32,
    #[serde(default)]
    pub charge_mode_threshold_watts: i32,
    #[serde(default)]
    pub mode_change_inhibit_minutes: i64,
    #[serde(default)]
    pub log_monitoring_data: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        if config.target_ip.is_empty() {
            return Err(ConfigError::InvalidTargetIp(config.target_ip));
        }
        config.fill_defaults();
        Ok(config)
    }

    pub fn target_addr(&self) -> Result<IpAddr, ConfigError> {
        self.target_ip
            .parse()
            .map_err(|_| ConfigError::InvalidTargetIp(self.target_ip.clone()))
    }

    fn fill_defaults(&mut self) {
        if self.monitor_interval_seconds <= 0 {
            warn!(
                default = DEFAULT_MONITOR_INTERVAL_SECONDS,
                "'monitor_interval_seconds' unset or not positive, using default"
            );
            self.monitor_interval_seconds = DEFAULT_MONITOR_INTERVAL_SECONDS;
        }
        if self.charge_power_update_interval_minutes <= 0 {
            warn!(
                default = DEFAULT_POWER_UPDATE_INTERVAL_MINUTES,
                "'charge_power_update_interval_minutes' unset or not positive, using default"
            );
            self.charge_power_update_interval_minutes = DEFAULT_POWER_UPDATE_INTERVAL_MINUTES;
        }
        if self.mode_change_inhibit_minutes <= 0 {
            warn!(
                default = DEFAULT_MODE_CHANGE_INHIBIT_MINUTES,
                "'mode_change_inhibit_minutes' unset or not positive, using default"
            );
            self.mode_change_inhibit_minutes = DEFAULT_MODE_CHANGE_INHIBIT_MINUTES;
        }
    }

    pub fn log_summary(&self) {
        info!(target_ip = %self.target_ip, "config: target_ip");
        info!(seconds = self.monitor_interval_seconds, "config: monitor interval");
        info!(start = %self.charge_window_start, end = %self.charge_window_end, "config: charge window");
        info!(
            minutes = self.charge_power_update_interval_minutes,
            "config: charge power update interval"
        );
        info!(watts = self.auto_mode_threshold_watts, "config: auto mode threshold");
        info!(watts = self.charge_mode_threshold_watts, "config: charge mode threshold");
        info!(minutes = self.mode_change_inhibit_minutes, "config: mode change inhibit");
        info!(enabled = self.log_monitoring_data, "config: log monitoring data");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        target_ip = "192.168.1.50"
        monitor_interval_seconds = 30
        charge_window_start = "23:00"
        charge_window_end = "06:00"
        charge_power_update_interval_minutes = 15
        auto_mode_threshold_watts = 200
        charge_mode_threshold_watts = 800
        mode_change_inhibit_minutes = 7
        log_monitoring_data = true
    "#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.target_ip, "192.168.1.50");
        assert_eq!(config.monitor_interval_seconds, 30);
        assert_eq!(config.charge_window_start, "23:00");
        assert_eq!(config.charge_window_end, "06:00");
        assert_eq!(config.charge_power_update_interval_minutes, 15);
        assert_eq!(config.auto_mode_threshold_watts, 200);
        assert_eq!(config.charge_mode_threshold_watts, 800);
        assert_eq!(config.mode_change_inhibit_minutes, 7);
        assert!(config.log_monitoring_data);
        assert_eq!(config.target_addr().unwrap(), IpAddr::from([192, 168, 1, 50]));
    }

    #[test]
    fn fills_defaults_for_missing_intervals() {
        let config = Config::from_toml(
            r#"
            target_ip = "192.168.1.50"
            charge_window_start = "23:00"
            charge_window_end = "06:00"
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor_interval_seconds, 10);
        assert_eq!(config.charge_power_update_interval_minutes, 10);
        assert_eq!(config.mode_change_inhibit_minutes, 5);
        assert_eq!(config.auto_mode_threshold_watts, 0);
        assert!(!config.log_monitoring_data);
    }

    #[test]
    fn fills_defaults_for_non_positive_intervals() {
        let config = Config::from_toml(
            r#"
            target_ip = "192.168.1.50"
            monitor_interval_seconds = 0
            charge_window_start = "23:00"
            charge_window_end = "06:00"
            mode_change_inhibit_minutes = -3
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor_interval_seconds, 10);
        assert_eq!(config.mode_change_inhibit_minutes, 5);
    }

    #[test]
    fn rejects_missing_target_ip() {
        let err = Config::from_toml(
            r#"
            charge_window_start = "23:00"
            charge_window_end = "06:00"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = Config::from_toml(
            r#"
            target_ip = ""
            charge_window_start = "23:00"
            charge_window_end = "06:00"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTargetIp(_)));
    }

    #[test]
    fn rejects_unparseable_target_ip() {
        let config = Config::from_toml(
            r#"
            target_ip = "not-an-ip"
            charge_window_start = "23:00"
            charge_window_end = "06:00"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.target_addr(),
            Err(ConfigError::InvalidTargetIp(_))
        ));
    }
}
