use marketprism_protocol::error::ConfigError;
use marketprism_storage::PoolSettings;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicatorAppConfig {
    pub hot: StoreConfig,
    pub cold: StoreConfig,
    #[serde(default)]
    pub replicator: ReplicatorConfig,
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
        Self { metrics_port: 9103 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub connection_string: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl StoreConfig {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings { connection_string: self.connection_string.clone(), max_connections: self.max_connections }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReplicatorConfig {
    pub interval_seconds: u64,
    pub window_hours: i64,
    pub batch_limit: i64,
    pub retention_hours: i64,
    pub exchange: Option<String>,
    pub market_type: Option<String>,
    pub symbol_prefix: Option<String>,
    pub dry_run: bool,
    pub cleanup_enabled: bool,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            window_hours: 72,
            batch_limit: 10_000,
            retention_hours: 72,
            exchange: None,
            market_type: None,
            symbol_prefix: None,
            dry_run: false,
            cleanup_enabled: false,
        }
    }
}

fn default_max_connections() -> usize {
    8
}

impl ReplicatorAppConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid { key: "<root>".to_string(), detail: e.to_string() })
    }

    /// Config file plus `MIGRATION_*` environment overrides (spec §4.7
    /// scheduling), applied after the file so operators can override a
    /// single run without editing the config.
    pub fn from_env_or_default_path() -> Result<Self, ConfigError> {
        let path = std::env::var("REPLICATOR_CONFIG").unwrap_or_else(|_| "config/replicator.yaml".to_string());
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Invalid { key: path.clone(), detail: e.to_string() })?;
        let mut config = Self::from_yaml(&text)?;

        if let Ok(exchange) = std::env::var("MIGRATION_EXCHANGE") {
            config.replicator.exchange = Some(exchange);
        }
        if let Ok(market_type) = std::env::var("MIGRATION_MARKET_TYPE") {
            config.replicator.market_type = Some(market_type);
        }
        if let Ok(prefix) = std::env::var("MIGRATION_SYMBOL_PREFIX") {
            config.replicator.symbol_prefix = Some(prefix);
        }
        if std::env::var("MIGRATION_DRY_RUN").is_ok() {
            config.replicator.dry_run = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let yaml = r#"
hot:
  connection_string: "postgres://localhost/hot"
cold:
  connection_string: "postgres://localhost/cold"
"#;
        let config = ReplicatorAppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.replicator.interval_seconds, 300);
        assert_eq!(config.replicator.batch_limit, 10_000);
        assert!(!config.replicator.dry_run);
    }

    #[test]
    fn rejects_unknown_key() {
        let yaml = r#"
hot:
  connection_string: "postgres://localhost/hot"
cold:
  connection_string: "postgres://localhost/cold"
bogus: true
"#;
        assert!(ReplicatorAppConfig::from_yaml(yaml).is_err());
    }
}
