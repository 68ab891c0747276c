// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_AUDIT_LOG, DEFAULT_BUFFER_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_EARTH_HOST,
    DEFAULT_EARTH_PORT, DEFAULT_FORWARDER_RESTART_DELAY, DEFAULT_IDLE_POLL, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_RESEND_INTERVAL, DEFAULT_ROVER_HOST, DEFAULT_ROVER_PORT,
    DEFAULT_STATUS_INTERVAL, MAX_UDP_PAYLOAD,
};
use crate::egress::{EgressConfig, ReconnectPolicy};
use crate::errors::ConfigError;
use crate::ingest::IngestConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Configuration for the telemetry relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the rover listener binds to
    pub rover_host: String,
    /// UDP port the rover sends telemetry to, 0 picks a free port
    pub rover_port: u16,
    /// Mission control host
    pub earth_host: String,
    /// Mission control TCP port
    pub earth_port: u16,
    /// Number of records held while earth is unreachable
    pub buffer_capacity: usize,
    /// Wait before retrying a record that failed to send
    pub resend_interval: Duration,
    /// Longest the forwarder waits on an empty buffer before rechecking shutdown
    pub idle_poll: Duration,
    /// Largest datagram accepted from the rover
    pub max_datagram_size: usize,
    /// Audit log file, `None` disables the audit trail
    pub audit_log: Option<PathBuf>,
    pub reconnect_policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    /// How many times the forwarder is restarted after an initial connect failure
    pub forwarder_restarts: u32,
    pub forwarder_restart_delay: Duration,
    /// How often the daemon logs link status
    pub status_interval: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rover_host: DEFAULT_ROVER_HOST.to_string(),
            rover_port: DEFAULT_ROVER_PORT,
            earth_host: DEFAULT_EARTH_HOST.to_string(),
            earth_port: DEFAULT_EARTH_PORT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            idle_poll: DEFAULT_IDLE_POLL,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            audit_log: Some(PathBuf::from(DEFAULT_AUDIT_LOG)),
            reconnect_policy: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            forwarder_restarts: 0,
            forwarder_restart_delay: DEFAULT_FORWARDER_RESTART_DELAY,
            status_interval: DEFAULT_STATUS_INTERVAL,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, warnings: &mut Vec<String>) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warnings.push(format!("Ignoring unparseable value '{}' for {}", raw, name));
            None
        }
    }
}

fn env_millis(name: &str, warnings: &mut Vec<String>) -> Option<Duration> {
    env_parse::<u64>(name, warnings).map(Duration::from_millis)
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let (config, warnings) = Self::from_env_with_warnings()?;
        for warning in warnings {
            warn!("{}", warning);
        }
        Ok(config)
    }

    /// Like [`RelayConfig::from_env`], but hands back the warnings about
    /// ignored values instead of logging them. Used before a subscriber exists.
    pub fn from_env_with_warnings() -> Result<(Self, Vec<String>), ConfigError> {
        let defaults = Self::default();
        let mut warnings = Vec::new();
        let w = &mut warnings;

        let audit_log = match env::var("RELAY_AUDIT_LOG") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => defaults.audit_log,
        };
        let reconnect_policy = match env::var("RELAY_RECONNECT_POLICY") {
            Ok(raw) => raw.parse().map_err(ConfigError::InvalidConfig)?,
            Err(_) => defaults.reconnect_policy,
        };

        let config = Self {
            rover_host: env::var("RELAY_ROVER_HOST").unwrap_or(defaults.rover_host),
            rover_port: env_parse("RELAY_ROVER_PORT", w).unwrap_or(defaults.rover_port),
            earth_host: env::var("RELAY_EARTH_HOST").unwrap_or(defaults.earth_host),
            earth_port: env_parse("RELAY_EARTH_PORT", w).unwrap_or(defaults.earth_port),
            buffer_capacity: env_parse("RELAY_BUFFER_CAPACITY", w)
                .unwrap_or(defaults.buffer_capacity),
            resend_interval: env_millis("RELAY_RESEND_INTERVAL_MS", w)
                .unwrap_or(defaults.resend_interval),
            idle_poll: env_millis("RELAY_IDLE_POLL_MS", w).unwrap_or(defaults.idle_poll),
            max_datagram_size: env_parse("RELAY_MAX_DATAGRAM_SIZE", w)
                .unwrap_or(defaults.max_datagram_size),
            audit_log,
            reconnect_policy,
            connect_timeout: env_millis("RELAY_CONNECT_TIMEOUT_MS", w)
                .unwrap_or(defaults.connect_timeout),
            forwarder_restarts: env_parse("RELAY_FORWARDER_RESTARTS", w)
                .unwrap_or(defaults.forwarder_restarts),
            forwarder_restart_delay: env_millis("RELAY_FORWARDER_RESTART_DELAY_MS", w)
                .unwrap_or(defaults.forwarder_restart_delay),
            status_interval: env_parse::<u64>("RELAY_STATUS_INTERVAL_SECS", w)
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_interval),
            log_level: env::var("RELAY_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok((config, warnings))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rover_host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "rover host cannot be empty".to_string(),
            ));
        }
        if self.earth_host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "earth host cannot be empty".to_string(),
            ));
        }

        // The rover port may be 0 to let the OS pick one; earth must be real.
        if self.earth_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "earth port must be greater than 0".to_string(),
            ));
        }

        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "buffer capacity must be greater than 0".to_string(),
            ));
        }

        if self.resend_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "resend interval must be greater than 0".to_string(),
            ));
        }
        if self.idle_poll.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "idle poll interval must be greater than 0".to_string(),
            ));
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "status interval must be greater than 0".to_string(),
            ));
        }

        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(ConfigError::InvalidConfig(format!(
                "max datagram size must be between 1 and {} bytes, got {}",
                MAX_UDP_PAYLOAD, self.max_datagram_size
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            host: self.rover_host.clone(),
            port: self.rover_port,
            max_datagram_size: self.max_datagram_size,
        }
    }

    pub fn egress_config(&self) -> EgressConfig {
        EgressConfig {
            resend_interval: self.resend_interval,
            idle_poll: self.idle_poll,
            reconnect_policy: self.reconnect_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing_test::traced_test;

    const RELAY_VARS: &[&str] = &[
        "RELAY_ROVER_HOST",
        "RELAY_ROVER_PORT",
        "RELAY_EARTH_HOST",
        "RELAY_EARTH_PORT",
        "RELAY_BUFFER_CAPACITY",
        "RELAY_RESEND_INTERVAL_MS",
        "RELAY_IDLE_POLL_MS",
        "RELAY_MAX_DATAGRAM_SIZE",
        "RELAY_AUDIT_LOG",
        "RELAY_RECONNECT_POLICY",
        "RELAY_CONNECT_TIMEOUT_MS",
        "RELAY_FORWARDER_RESTARTS",
        "RELAY_FORWARDER_RESTART_DELAY_MS",
        "RELAY_STATUS_INTERVAL_SECS",
        "RELAY_LOG_LEVEL",
    ];

    fn clear_env() {
        for var in RELAY_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rover_port, 50055);
        assert_eq!(config.earth_port, 60066);
        assert_eq!(config.buffer_capacity, 500);
        assert_eq!(config.resend_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = RelayConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_earth_port() {
        let config = RelayConfig {
            earth_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            rover_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_datagram_size() {
        for size in [0, MAX_UDP_PAYLOAD + 1] {
            let config = RelayConfig {
                max_datagram_size: size,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "size {} should be rejected", size);
        }
    }

    #[test]
    fn test_validate_intervals() {
        let config = RelayConfig {
            resend_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            idle_poll: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            status_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_status_interval() {
        clear_env();
        env::set_var("RELAY_STATUS_INTERVAL_SECS", "0");

        let result = RelayConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_empty_hosts() {
        let config = RelayConfig {
            earth_host: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = RelayConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("RELAY_ROVER_PORT", "6000");
        env::set_var("RELAY_EARTH_HOST", "10.1.1.1");
        env::set_var("RELAY_BUFFER_CAPACITY", "3");
        env::set_var("RELAY_RESEND_INTERVAL_MS", "250");
        env::set_var("RELAY_RECONNECT_POLICY", "reconnect");
        env::set_var("RELAY_AUDIT_LOG", "");
        env::set_var("RELAY_LOG_LEVEL", "DEBUG");

        let config = RelayConfig::from_env().expect("config should load");
        clear_env();

        assert_eq!(config.rover_port, 6000);
        assert_eq!(config.earth_host, "10.1.1.1");
        assert_eq!(config.buffer_capacity, 3);
        assert_eq!(config.resend_interval, Duration::from_millis(250));
        assert_eq!(config.reconnect_policy, ReconnectPolicy::ReconnectThenRetry);
        assert_eq!(config.audit_log, None);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_from_env_unparseable_falls_back() {
        clear_env();
        env::set_var("RELAY_EARTH_PORT", "not-a-port");

        let (config, warnings) =
            RelayConfig::from_env_with_warnings().expect("config should load");
        clear_env();

        assert_eq!(config.earth_port, DEFAULT_EARTH_PORT);
        assert_eq!(
            warnings,
            vec!["Ignoring unparseable value 'not-a-port' for RELAY_EARTH_PORT".to_string()]
        );
        assert_eq!(
            config.audit_log,
            Some(PathBuf::from(DEFAULT_AUDIT_LOG))
        );
    }

    #[test]
    #[serial]
    #[traced_test]
    fn test_from_env_logs_ignored_values() {
        clear_env();
        env::set_var("RELAY_BUFFER_CAPACITY", "lots");

        let config = RelayConfig::from_env().expect("config should load");
        clear_env();

        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert!(logs_contain(
            "Ignoring unparseable value 'lots' for RELAY_BUFFER_CAPACITY"
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_policy() {
        clear_env();
        env::set_var("RELAY_RECONNECT_POLICY", "sometimes");

        let result = RelayConfig::from_env();
        clear_env();

        assert!(result.is_err());
    }

    #[test]
    fn test_split_configs() {
        let config = RelayConfig::default();
        let ingest = config.ingest_config();
        assert_eq!(ingest.host, "0.0.0.0");
        assert_eq!(ingest.port, 50055);
        assert_eq!(ingest.max_datagram_size, 1024);

        let egress = config.egress_config();
        assert_eq!(egress.resend_interval, Duration::from_secs(1));
        assert_eq!(egress.reconnect_policy, ReconnectPolicy::RetrySameConnection);
    }
}
