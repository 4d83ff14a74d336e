use marketprism_protocol::error::ConfigError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderbookConfig {
    pub bus: BusConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitoringConfig {
    pub metrics_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { metrics_port: 9104 }
    }
}

impl OrderbookConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid { key: "<root>".to_string(), detail: e.to_string() })
    }

    pub fn from_env_or_default_path() -> Result<Self, ConfigError> {
        let path = std::env::var("ORDERBOOK_CONFIG").unwrap_or_else(|_| "config/orderbook.yaml".to_string());
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
"#;
        let config = OrderbookConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.bus.url, "nats://127.0.0.1:4222");
    }
}
