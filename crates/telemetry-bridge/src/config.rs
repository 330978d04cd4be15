// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Loaded from a TOML file (or defaults), then overridden from the
//! environment, then validated.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub log_sink: LogSinkConfig,

    #[serde(default)]
    pub timeseries: TimeSeriesConfig,
}

/// Inbound broker link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Server URI (`tcp://host:port`).
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Client identifier presented to the broker.
    #[serde(default = "default_broker_client_id")]
    pub client_id: String,

    /// Topic filter, wildcards allowed.
    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Let the client reconnect on its own after a connection loss.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

fn default_broker_url() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_broker_client_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("telemetry-bridge-{}", millis)
}

fn default_topic_filter() -> String {
    "sensors/#".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keep_alive() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id: default_broker_client_id(),
            topic_filter: default_topic_filter(),
            connect_timeout_secs: default_connect_timeout(),
            keep_alive_secs: default_keep_alive(),
            auto_reconnect: true,
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Outbound log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSinkConfig {
    /// Bootstrap servers (`host:port[,host:port]`).
    #[serde(default = "default_log_brokers")]
    pub brokers: String,

    #[serde(default = "default_log_topic")]
    pub topic: String,

    #[serde(default = "default_log_client_id")]
    pub client_id: String,

    #[serde(default = "default_backoff")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub reconnect_backoff_max_ms: u64,

    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

fn default_log_brokers() -> String {
    "localhost:9093".to_string()
}

fn default_log_topic() -> String {
    "sensores_cloud".to_string()
}

fn default_log_client_id() -> String {
    "telemetry-bridge-kafka-client".to_string()
}

fn default_backoff() -> u64 {
    60_000
}

fn default_backoff_max() -> u64 {
    600_000
}

fn default_close_timeout() -> u64 {
    10
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            brokers: default_log_brokers(),
            topic: default_log_topic(),
            client_id: default_log_client_id(),
            reconnect_backoff_ms: default_backoff(),
            reconnect_backoff_max_ms: default_backoff_max(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

impl LogSinkConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Outbound time-series store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    #[serde(default = "default_ts_url")]
    pub url: String,

    /// API token. Required.
    #[serde(default)]
    pub token: String,

    /// Organization. Required.
    #[serde(default)]
    pub org: String,

    /// Target bucket. Required.
    #[serde(default)]
    pub bucket: String,

    /// Lines per HTTP write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time a point waits in the batch.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Points queued for the writer thread before writes are refused.
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,

    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

fn default_ts_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_buffer_limit() -> usize {
    10_000
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            url: default_ts_url(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            buffer_limit: default_buffer_limit(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

impl TimeSeriesConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl BridgeConfig {
    /// Load from a TOML file. Does not validate; call [`validate`](Self::validate)
    /// after environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File (or defaults) plus environment overrides, validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override settings from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override settings from `lookup`. Unset or empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let overrides: [(&str, &mut String); 10] = [
            ("MQTT_BROKER", &mut self.broker.url),
            ("MQTT_CLIENT_ID", &mut self.broker.client_id),
            ("MQTT_TOPIC_FILTER", &mut self.broker.topic_filter),
            ("INFLUX_URL", &mut self.timeseries.url),
            ("INFLUX_TOKEN", &mut self.timeseries.token),
            ("INFLUX_ORG", &mut self.timeseries.org),
            ("INFLUX_BUCKET", &mut self.timeseries.bucket),
            ("KAFKA_BROKERS", &mut self.log_sink.brokers),
            ("KAFKA_TOPIC", &mut self.log_sink.topic),
            ("KAFKA_CLIENT_ID", &mut self.log_sink.client_id),
        ];

        for (key, slot) in overrides {
            if let Some(value) = get(key) {
                *slot = value;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeseries.token.is_empty() {
            return Err(ConfigError::Missing("timeseries.token (INFLUX_TOKEN)"));
        }
        if self.timeseries.org.is_empty() {
            return Err(ConfigError::Missing("timeseries.org (INFLUX_ORG)"));
        }
        if self.timeseries.bucket.is_empty() {
            return Err(ConfigError::Missing("timeseries.bucket (INFLUX_BUCKET)"));
        }
        if self.broker.url.is_empty() {
            return Err(ConfigError::Missing("broker.url (MQTT_BROKER)"));
        }
        if self.broker.topic_filter.is_empty() {
            return Err(ConfigError::Invalid("broker.topic_filter is empty".into()));
        }
        if self.log_sink.topic.is_empty() {
            return Err(ConfigError::Invalid("log_sink.topic is empty".into()));
        }
        if self.log_sink.reconnect_backoff_max_ms < self.log_sink.reconnect_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "log_sink.reconnect_backoff_max_ms ({}) is below reconnect_backoff_ms ({})",
                self.log_sink.reconnect_backoff_max_ms, self.log_sink.reconnect_backoff_ms
            )));
        }
        if self.timeseries.batch_size == 0 || self.timeseries.buffer_limit == 0 {
            return Err(ConfigError::Invalid(
                "timeseries.batch_size and timeseries.buffer_limit must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Log the effective configuration, token masked.
    pub fn log_summary(&self) {
        tracing::info!(
            url = %self.broker.url,
            client_id = %self.broker.client_id,
            topic_filter = %self.broker.topic_filter,
            "Broker link"
        );
        tracing::info!(
            brokers = %self.log_sink.brokers,
            topic = %self.log_sink.topic,
            client_id = %self.log_sink.client_id,
            "Log sink"
        );
        tracing::info!(
            url = %self.timeseries.url,
            org = %self.timeseries.org,
            bucket = %self.timeseries.bucket,
            token = %mask(&self.timeseries.token),
            "Time-series sink"
        );
    }

    /// Example configuration, as written by `gen-config`.
    pub fn example() -> Self {
        let mut config = Self::default();
        config.broker.client_id = "telemetry-bridge".to_string();
        config.timeseries.token = "my-token".to_string();
        config.timeseries.org = "my-org".to_string();
        config.timeseries.bucket = "sensors".to_string();
        config
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "<unset>".to_string()
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();

        assert_eq!(config.broker.url, "tcp://localhost:1883");
        assert!(config.broker.client_id.starts_with("telemetry-bridge-"));
        assert_eq!(config.broker.topic_filter, "sensors/#");
        assert_eq!(config.broker.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.broker.keep_alive(), Duration::from_secs(20));
        assert_eq!(config.log_sink.brokers, "localhost:9093");
        assert_eq!(config.log_sink.topic, "sensores_cloud");
        assert_eq!(config.log_sink.reconnect_backoff_ms, 60_000);
        assert_eq!(config.log_sink.reconnect_backoff_max_ms, 600_000);
        assert_eq!(config.timeseries.url, "http://localhost:8086");
    }

    #[test]
    fn test_defaults_fail_validation() {
        let err = BridgeConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("MQTT_BROKER", "tcp://mqtt:1883"),
            ("MQTT_TOPIC_FILTER", "farm/+/telemetry"),
            ("INFLUX_TOKEN", "secret"),
            ("INFLUX_ORG", "acme"),
            ("INFLUX_BUCKET", "sensors"),
            ("KAFKA_TOPIC", ""),
        ]);

        let mut config = BridgeConfig::default();
        config.apply_env_from(|k| vars.get(k).cloned());

        assert_eq!(config.broker.url, "tcp://mqtt:1883");
        assert_eq!(config.broker.topic_filter, "farm/+/telemetry");
        assert_eq!(config.timeseries.token, "secret");
        // Empty value keeps the default
        assert_eq!(config.log_sink.topic, "sensores_cloud");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_backoff_order() {
        let mut config = BridgeConfig::example();
        config.log_sink.reconnect_backoff_max_ms = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_empty_topic_filter() {
        let mut config = BridgeConfig::example();
        config.broker.topic_filter.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = BridgeConfig::from_toml(
            r#"
[broker]
url = "tcp://10.0.0.5:1883"

[timeseries]
token = "t"
org = "o"
bucket = "b"
batch_size = 50
"#,
        )
        .unwrap();

        assert_eq!(config.broker.url, "tcp://10.0.0.5:1883");
        assert_eq!(config.broker.topic_filter, "sensors/#");
        assert_eq!(config.timeseries.batch_size, 50);
        assert_eq!(config.log_sink.topic, "sensores_cloud");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_serializes_and_loads() {
        let toml_str = toml::to_string_pretty(&BridgeConfig::example()).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_str.as_bytes()).unwrap();

        let loaded = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.broker.client_id, "telemetry-bridge");
        assert_eq!(loaded.timeseries.bucket, "sensors");
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let err = BridgeConfig::from_toml("[broker\nurl=").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(""), "<unset>");
        assert_eq!(mask("abc"), "****");
    }
}
