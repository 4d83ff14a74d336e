use marketprism_protocol::error::ConfigError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    pub bus: BusConfig,
    pub database: DatabaseConfig,
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
        Self { metrics_port: 9102 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub connection_string: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

fn default_max_connections() -> usize {
    16
}

fn default_ttl_days() -> u32 {
    3
}

impl WriterConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid { key: "<root>".to_string(), detail: e.to_string() })
    }

    pub fn from_env_or_default_path() -> Result<Self, ConfigError> {
        let path = std::env::var("HOT_WRITER_CONFIG").unwrap_or_else(|_| "config/hot_writer.yaml".to_string());
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Invalid { key: path.clone(), detail: e.to_string() })?;
        Self::from_yaml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let yaml = r#"
bus:
  url: "nats://127.0.0.1:4222"
database:
  connection_string: "postgres://localhost/hot"
"#;
        let config = WriterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.database.max_connections, 16);
        assert_eq!(config.database.ttl_days, 3);
    }
}
