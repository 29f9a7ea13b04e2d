// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline configuration.
//!
//! Loaded from TOML; every field has a default so a partial file (or none
//! at all) is valid.
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [pipeline]
//! tick_period_ms = 5000
//! history_capacity = 10
//!
//! [store]
//! backend = "influx"
//! url = "http://localhost:8086"
//! bucket = "iot_data"
//! ```

use crate::store::{InfluxSettings, MemoryStore, StoreWriterConfig, DEFAULT_MEMORY_MAX_POINTS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the producer gets its readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Built-in random-walk generator.
    #[default]
    Simulated,
    /// Measurements posted to the ingestion endpoint.
    Ingest,
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" => Ok(SourceMode::Simulated),
            "ingest" => Ok(SourceMode::Ingest),
            other => Err(format!("unknown source '{}' (simulated|ingest)", other)),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceMode::Simulated => "simulated",
            SourceMode::Ingest => "ingest",
        })
    }
}

/// Persistence backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Influx,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "influx" | "influxdb" => Ok(StoreBackend::Influx),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}' (influx|memory)", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Influx => "influx",
            StoreBackend::Memory => "memory",
        })
    }
}

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorcastConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP/WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Concurrent WebSocket clients; further upgrades get 503.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

/// Producer, history and fan-out tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Points kept per metric kind.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Frames that may wait for one slow client before it is dropped.
    #[serde(default = "default_subscriber_queue_depth")]
    pub subscriber_queue_depth: usize,

    /// Upper bound on one WebSocket send.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default)]
    pub source: SourceMode,

    /// Measurements that may wait between ticks in ingest mode.
    #[serde(default = "default_ingest_queue_depth")]
    pub ingest_queue_depth: usize,

    /// Seed for the simulated source; random when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Time-series store connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_org")]
    pub org: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Value of the `device` tag on every point.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Readings that may wait for the store before new ones are dropped.
    #[serde(default = "default_store_queue_depth")]
    pub queue_depth: usize,

    /// Retention for a bucket created at startup, and for points held by
    /// the memory backend (0 = keep forever).
    #[serde(default)]
    pub retention_secs: u64,

    /// Most points the memory backend holds before evicting the oldest.
    #[serde(default = "default_memory_max_points")]
    pub memory_max_points: usize,
}

fn default_memory_max_points() -> usize {
    DEFAULT_MEMORY_MAX_POINTS
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_clients() -> usize {
    100
}

fn default_tick_period_ms() -> u64 {
    5000
}

fn default_history_capacity() -> usize {
    crate::history::DEFAULT_CAPACITY
}

fn default_subscriber_queue_depth() -> usize {
    crate::broadcaster::DEFAULT_QUEUE_DEPTH
}

fn default_send_timeout_ms() -> u64 {
    2000
}

fn default_ingest_queue_depth() -> usize {
    32
}

fn default_store_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_org() -> String {
    "sensorcast".to_string()
}

fn default_bucket() -> String {
    "iot_data".to_string()
}

fn default_measurement() -> String {
    "temperature_readings".to_string()
}

fn default_source_tag() -> String {
    "raspberry-pi".to_string()
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_store_queue_depth() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_clients: default_max_clients(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            history_capacity: default_history_capacity(),
            subscriber_queue_depth: default_subscriber_queue_depth(),
            send_timeout_ms: default_send_timeout_ms(),
            source: SourceMode::default(),
            ingest_queue_depth: default_ingest_queue_depth(),
            seed: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            org: default_org(),
            bucket: default_bucket(),
            token: String::new(),
            measurement: default_measurement(),
            source_tag: default_source_tag(),
            write_timeout_ms: default_write_timeout_ms(),
            queue_depth: default_store_queue_depth(),
            retention_secs: 0,
            memory_max_points: default_memory_max_points(),
        }
    }
}

impl SensorcastConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. for `gen-config`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid(
                "server.max_clients must be at least 1".into(),
            ));
        }

        let p = &self.pipeline;
        if p.tick_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.tick_period_ms must be non-zero".into(),
            ));
        }
        if p.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.history_capacity must be at least 1".into(),
            ));
        }
        if p.subscriber_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.subscriber_queue_depth must be at least 1".into(),
            ));
        }
        if p.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.send_timeout_ms must be non-zero".into(),
            ));
        }
        if p.source == SourceMode::Ingest && p.ingest_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.ingest_queue_depth must be at least 1".into(),
            ));
        }

        let s = &self.store;
        if s.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.write_timeout_ms must be non-zero".into(),
            ));
        }
        if s.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "store.queue_depth must be at least 1".into(),
            ));
        }
        if s.backend == StoreBackend::Influx {
            if !(s.url.starts_with("http://") || s.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "store.url '{}' must start with http:// or https://",
                    s.url
                )));
            }
            for (name, value) in [
                ("org", &s.org),
                ("bucket", &s.bucket),
                ("measurement", &s.measurement),
                ("source_tag", &s.source_tag),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("store.{} is empty", name)));
                }
            }
        }

        Ok(())
    }

    /// `bind:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.pipeline.tick_period_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.send_timeout_ms)
    }

    pub fn writer_config(&self) -> StoreWriterConfig {
        StoreWriterConfig {
            queue_depth: self.store.queue_depth,
            write_timeout: Duration::from_millis(self.store.write_timeout_ms),
            ..Default::default()
        }
    }

    /// In-memory backend honoring `retention_secs` and `memory_max_points`.
    pub fn memory_store(&self) -> MemoryStore {
        MemoryStore::with_retention(Duration::from_secs(self.store.retention_secs))
            .max_points(self.store.memory_max_points)
    }

    pub fn influx_settings(&self) -> InfluxSettings {
        let s = &self.store;
        InfluxSettings {
            url: s.url.clone(),
            org: s.org.clone(),
            bucket: s.bucket.clone(),
            token: s.token.clone(),
            measurement: s.measurement.clone(),
            source_key: "device".to_string(),
            source: s.source_tag.clone(),
            retention_secs: s.retention_secs,
            request_timeout: Duration::from_millis(s.write_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = SensorcastConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_period(), Duration::from_secs(5));
        assert_eq!(config.pipeline.history_capacity, 10);
        assert_eq!(config.store.bucket, "iot_data");
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_memory_store_follows_store_section() {
        use crate::reading::{MetricKind, Reading};
        use crate::store::TimeSeriesStore;

        let config = SensorcastConfig::from_toml_str(
            r#"
[store]
backend = "memory"
retention_secs = 60
memory_max_points = 2
"#,
        )
        .unwrap();
        let store = config.memory_store();

        let now = chrono::Utc::now();
        let stale = Reading::new(MetricKind::Temperature, 1.0, now - chrono::Duration::days(30));
        let fresh: Vec<Reading> = (0..3)
            .map(|i| Reading::new(MetricKind::Humidity, i as f64, now))
            .collect();
        store.write_batch(&[stale]).await.unwrap();
        assert!(store.is_empty());

        store.write_batch(&fresh).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = SensorcastConfig::from_toml_str(
            r#"
[pipeline]
tick_period_ms = 1000
source = "ingest"

[store]
backend = "memory"
"#,
        )
        .unwrap();

        assert_eq!(config.pipeline.tick_period_ms, 1000);
        assert_eq!(config.pipeline.source, SourceMode::Ingest);
        assert_eq!(config.pipeline.history_capacity, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_capacity = "[pipeline]\nhistory_capacity = 0\n";
        assert!(matches!(
            SensorcastConfig::from_toml_str(zero_capacity),
            Err(ConfigError::Invalid(_))
        ));

        let bad_url = "[store]\nurl = \"localhost:8086\"\n";
        assert!(matches!(
            SensorcastConfig::from_toml_str(bad_url),
            Err(ConfigError::Invalid(_))
        ));

        // The URL only matters for the InfluxDB backend.
        let memory = "[store]\nbackend = \"memory\"\nurl = \"\"\n";
        assert!(SensorcastConfig::from_toml_str(memory).is_ok());

        assert!(matches!(
            SensorcastConfig::from_toml_str("[pipeline]\nsource = \"mqtt\"\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_generated_config_parses_back() {
        let mut config = SensorcastConfig::default();
        config.pipeline.seed = Some(7);
        let text = config.to_toml().unwrap();
        assert_eq!(SensorcastConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000\nmax_clients = 2").unwrap();

        let config = SensorcastConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_clients, 2);

        assert!(matches!(
            SensorcastConfig::from_file("/nonexistent/sensorcast.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("INGEST".parse::<SourceMode>(), Ok(SourceMode::Ingest));
        assert_eq!("influxdb".parse::<StoreBackend>(), Ok(StoreBackend::Influx));
        assert!("disk".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_influx_settings_from_store_section() {
        let config = SensorcastConfig::default();
        let settings = config.influx_settings();
        assert_eq!(settings.source_key, "device");
        assert_eq!(settings.source, "raspberry-pi");
        assert_eq!(settings.measurement, "temperature_readings");
        assert_eq!(config.writer_config().queue_depth, 64);
    }
}
