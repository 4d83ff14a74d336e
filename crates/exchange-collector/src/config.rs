//! Typed YAML configuration (spec §10.3), in the teacher's nested-struct
//! style (`data_writer`'s `AppConfig`/`DataWriterConfig`): unknown keys are
//! rejected by `serde(deny_unknown_fields)` rather than silently ignored.

use marketprism_protocol::error::ConfigError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub exchanges: Vec<ExchangeConfig>,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitoringConfig {
    pub metrics_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        // Matches the teacher's `exchange_collector::metrics_server` port.
        Self { metrics_port: 9090 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfig {
    pub name: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid { key: "<root>".to_string(), detail: e.to_string() })
    }

    pub fn from_env_or_default_path() -> Result<Self, ConfigError> {
        let path = std::env::var("COLLECTOR_CONFIG").unwrap_or_else(|_| "config/collector.yaml".to_string());
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Invalid { key: path.clone(), detail: e.to_string() })?;
        Self::from_yaml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
bus:
  url: "nats://127.0.0.1:4222"
exchanges:
  - name: coinbase
    symbols: ["BTC-USD"]
logging:
  level: debug
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.bus.url, "nats://127.0.0.1:4222");
        assert_eq!(config.exchanges.len(), 1);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn rejects_unknown_key() {
        let yaml = r#"
bus:
  url: "nats://127.0.0.1:4222"
exchanges: []
logging:
  level: info
typo_field: true
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }
}
