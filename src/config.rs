use dotenvy::dotenv;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MQTT_HOST: &str = "p02bbe2c.ala.us-east-1.emqxsl.com";
pub const DEFAULT_MQTT_PORT: u16 = 8883;
pub const DEFAULT_MQTT_TOPIC: &str = "apollo-air-1-10b368/#";
pub const DEFAULT_CA_CERT_PATH: &str = "emqxsl-ca.crt";
pub const DEFAULT_DASHBOARD_TITLE: &str = "AIR-01 Raw Sensor Data via MQTT";
/// Largest remaining length the MQTT wire format can express.
pub const MQTT_MAX_PACKET_SIZE: usize = 268_435_455;

/// Everything needed to reach the broker. Fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub ca_cert_path: PathBuf,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_packet_size: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,

    pub dashboard_address: IpAddr,
    pub dashboard_port: u16,
    pub dashboard_title: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl BrokerConfig {
    /// `host:port`, as shown in the dashboard header.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Validate ranges and the topic filter.
    fn validate(&self) -> Result<(), ConfigError> {
        const KEEP_ALIVE_RANGE: std::ops::RangeInclusive<u64> = 5..=3600;
        const CONNECT_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=120;

        if !KEEP_ALIVE_RANGE.contains(&self.broker.keep_alive_secs) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_KEEP_ALIVE_SECS must be between {} and {} seconds",
                KEEP_ALIVE_RANGE.start(),
                KEEP_ALIVE_RANGE.end()
            )));
        }

        if !CONNECT_TIMEOUT_RANGE.contains(&self.broker.connect_timeout_secs) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_CONNECT_TIMEOUT_SECS must be between {} and {} seconds",
                CONNECT_TIMEOUT_RANGE.start(),
                CONNECT_TIMEOUT_RANGE.end()
            )));
        }

        if !(1024..=MQTT_MAX_PACKET_SIZE).contains(&self.broker.max_packet_size) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_MAX_PACKET_SIZE must be between 1024 and {} bytes",
                MQTT_MAX_PACKET_SIZE
            )));
        }

        if !rumqttc::valid_filter(&self.broker.topic) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_TOPIC '{}' is not a valid topic filter",
                self.broker.topic
            )));
        }

        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load environment variables from .env file

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Every key is
    /// optional; the defaults describe the AIR-01 sensor deployment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let trimmed_or = |key: &str, default: &str| string_or(key, default).trim().to_string();

        let client_id = lookup("MQTT_CLIENT_ID")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("mqtt_dashboard_{}", Uuid::new_v4()));

        let config = Self {
            broker: BrokerConfig {
                host: string_or("MQTT_HOST", DEFAULT_MQTT_HOST),
                port: parse_value("MQTT_PORT", &trimmed_or("MQTT_PORT", &DEFAULT_MQTT_PORT.to_string()))?,
                topic: string_or("MQTT_TOPIC", DEFAULT_MQTT_TOPIC),
                ca_cert_path: PathBuf::from(string_or("MQTT_CA_CERT_PATH", DEFAULT_CA_CERT_PATH)),
                client_id,
                keep_alive_secs: parse_value("MQTT_KEEP_ALIVE_SECS", &trimmed_or("MQTT_KEEP_ALIVE_SECS", "60"))?,
                connect_timeout_secs: parse_value(
                    "MQTT_CONNECT_TIMEOUT_SECS",
                    &trimmed_or("MQTT_CONNECT_TIMEOUT_SECS", "10"),
                )?,
                max_packet_size: parse_value(
                    "MQTT_MAX_PACKET_SIZE",
                    &trimmed_or("MQTT_MAX_PACKET_SIZE", &MQTT_MAX_PACKET_SIZE.to_string()),
                )?,
            },

            dashboard_address: parse_value("DASHBOARD_ADDRESS", &trimmed_or("DASHBOARD_ADDRESS", "127.0.0.1"))?,
            dashboard_port: parse_value("DASHBOARD_PORT", &trimmed_or("DASHBOARD_PORT", "8501"))?,
            dashboard_title: string_or("DASHBOARD_TITLE", DEFAULT_DASHBOARD_TITLE),
        };

        config.validate()?;

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::ParsingError(format!("{} has an invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_sensor_deployment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.broker.host, DEFAULT_MQTT_HOST);
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.topic, "apollo-air-1-10b368/#");
        assert_eq!(config.broker.ca_cert_path, PathBuf::from("emqxsl-ca.crt"));
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.broker.max_packet_size, MQTT_MAX_PACKET_SIZE);
        assert!(config.broker.client_id.starts_with("mqtt_dashboard_"));
        assert_eq!(config.dashboard_port, 8501);
        assert_eq!(config.broker.target(), format!("{}:8883", DEFAULT_MQTT_HOST));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "1884"),
            ("MQTT_TOPIC", "device-1/#"),
            ("MQTT_CLIENT_ID", "dash"),
            ("DASHBOARD_ADDRESS", "0.0.0.0"),
        ])
        .unwrap();
        assert_eq!(config.broker.target(), "broker.local:1884");
        assert_eq!(config.broker.topic, "device-1/#");
        assert_eq!(config.broker.client_id, "dash");
        assert_eq!(config.dashboard_address.to_string(), "0.0.0.0");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("MQTT_HOST", "  "), ("MQTT_CLIENT_ID", "")]).unwrap();
        assert_eq!(config.broker.host, DEFAULT_MQTT_HOST);
        assert!(config.broker.client_id.starts_with("mqtt_dashboard_"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = config_from(&[("MQTT_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::ParsingError(_)));
        assert!(err.to_string().contains("MQTT_PORT"));
    }

    #[test]
    fn misplaced_wildcard_is_rejected() {
        let err = config_from(&[("MQTT_TOPIC", "device-1/#/a")]).unwrap_err();
        assert!(err.to_string().contains("not a valid topic filter"));
    }

    #[test]
    fn keep_alive_out_of_range_is_rejected() {
        assert!(config_from(&[("MQTT_KEEP_ALIVE_SECS", "1")]).is_err());
        assert!(config_from(&[("MQTT_CONNECT_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn packet_size_limit_is_validated() {
        let config = config_from(&[("MQTT_MAX_PACKET_SIZE", "65536")]).unwrap();
        assert_eq!(config.broker.max_packet_size, 65536);

        assert!(config_from(&[("MQTT_MAX_PACKET_SIZE", "100")]).is_err());
        assert!(config_from(&[("MQTT_MAX_PACKET_SIZE", "268435456")]).is_err());
    }
}
