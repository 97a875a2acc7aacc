//! Configuration structures for k2w.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI
//! flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka source configuration
    pub kafka: KafkaConfig,

    /// Object store sink configuration
    pub object_store: ObjectStoreConfig,

    /// Warehouse sink configuration
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Topic to consume from
    pub topic: String,

    /// Consumer group ID
    pub consumer_group: String,

    /// Poll timeout in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the longest sink write)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,

    /// SSL client certificate location
    pub ssl_cert_location: Option<PathBuf>,

    /// SSL client key location
    pub ssl_key_location: Option<PathBuf>,
}

/// Object store sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    /// Base path events are written under: `gs://bucket/prefix`,
    /// `s3://bucket/prefix`, or a local directory for development
    pub base_path: String,

    /// AWS region (S3)
    pub aws_region: Option<String>,

    /// AWS access key ID (S3)
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key (S3)
    pub aws_secret_access_key: Option<String>,

    /// S3 endpoint (MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,

    /// Service account key file (GCS)
    pub gcs_service_account_path: Option<PathBuf>,
}

/// Warehouse sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    /// REST endpoint of the warehouse. When unset, rows are kept in an
    /// in-process store (development mode, logged at startup).
    pub endpoint: Option<String>,

    /// Project identifier
    #[serde(default = "default_project")]
    pub project: String,

    /// Dataset identifier
    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// Bearer token for authentication
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            project: default_project(),
            dataset: default_dataset(),
            auth_token: None,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum messages processed concurrently
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Seconds to wait for in-flight work during shutdown
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,

    /// Seconds between offset commits
    #[serde(default = "default_commit_interval_seconds")]
    pub commit_interval_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            drain_timeout_seconds: default_drain_timeout_seconds(),
            commit_interval_seconds: default_commit_interval_seconds(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000 // 5 minutes - must exceed the slowest sink write
}
fn default_project() -> String {
    "default".to_string()
}
fn default_dataset() -> String {
    "events".to_string()
}
fn default_request_timeout_seconds() -> u64 {
    30
}
fn default_max_in_flight() -> usize {
    256
}
fn default_drain_timeout_seconds() -> u64 {
    30
}
fn default_commit_interval_seconds() -> u64 {
    5
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.object_store.base_path.is_empty() {
            return Err(crate::Error::Config(
                "Object store base path is required".into(),
            ));
        }

        if self.pipeline.max_in_flight == 0 {
            return Err(crate::Error::Config(
                "pipeline.max_in_flight must be at least 1".into(),
            ));
        }

        if self.warehouse.endpoint.is_some() {
            if self.warehouse.project.is_empty() {
                return Err(crate::Error::Config("Warehouse project is required".into()));
            }
            if self.warehouse.dataset.is_empty() {
                return Err(crate::Error::Config("Warehouse dataset is required".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            kafka: KafkaConfig {
                bootstrap_servers: vec!["localhost:9092".into()],
                topic: "business-events".into(),
                consumer_group: "k2w".into(),
                poll_timeout_ms: default_poll_timeout_ms(),
                session_timeout_ms: default_session_timeout_ms(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
                max_poll_interval_ms: default_max_poll_interval_ms(),
                auto_offset_reset: OffsetReset::Earliest,
                security: KafkaSecurityConfig::default(),
            },
            object_store: ObjectStoreConfig {
                base_path: "gs://events-bucket/raw".into(),
                aws_region: None,
                aws_access_key_id: None,
                aws_secret_access_key: None,
                s3_endpoint: None,
                gcs_service_account_path: None,
            },
            warehouse: WarehouseConfig::default(),
            pipeline: PipelineConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    #[test]
    fn test_base_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validation_empty_servers() {
        let mut config = base_config();
        config.kafka.bootstrap_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_topic() {
        let mut config = base_config();
        config.kafka.topic = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_validation_empty_consumer_group() {
        let mut config = base_config();
        config.kafka.consumer_group = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Consumer group"));
    }

    #[test]
    fn test_validation_empty_base_path() {
        let mut config = base_config();
        config.object_store.base_path = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base path"));
    }

    #[test]
    fn test_validation_zero_in_flight() {
        let mut config = base_config();
        config.pipeline.max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_warehouse_endpoint_requires_identifiers() {
        let mut config = base_config();
        config.warehouse.endpoint = Some("https://warehouse.example.com".into());
        config.warehouse.project = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("project"));
    }

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_in_flight, 256);
        assert_eq!(config.drain_timeout_seconds, 30);
        assert_eq!(config.commit_interval_seconds, 5);
    }

    #[test]
    fn test_default_monitoring_config() {
        let config = MonitoringConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.health_port, 8080);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_offset_reset_variants() {
        assert_eq!(OffsetReset::default(), OffsetReset::Earliest);
        assert_ne!(OffsetReset::Earliest, OffsetReset::Latest);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [kafka]
            bootstrap_servers = ["localhost:9092"]
            topic = "business-events"
            consumer_group = "k2w"

            [object_store]
            base_path = "gs://events-bucket/raw"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.kafka.poll_timeout_ms, 1000);
        assert!(config.warehouse.endpoint.is_none());
        assert_eq!(config.warehouse.dataset, "events");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [kafka]
            bootstrap_servers = ["broker-1:9092", "broker-2:9092"]
            topic = "business-events"
            consumer_group = "k2w-prod"
            auto_offset_reset = "latest"

            [kafka.security]
            protocol = "SASL_SSL"
            sasl_mechanism = "SCRAM-SHA-256"
            sasl_username = "svc-k2w"
            sasl_password = "secret"

            [object_store]
            base_path = "s3://events/raw"
            aws_region = "eu-west-1"

            [warehouse]
            endpoint = "https://warehouse.example.com/v2"
            project = "acme-analytics"
            dataset = "business_events"
            request_timeout_seconds = 10

            [pipeline]
            max_in_flight = 64
            drain_timeout_seconds = 15

            [monitoring]
            log_format = "text"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.kafka.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.kafka.security.protocol.as_deref(), Some("SASL_SSL"));
        assert_eq!(config.warehouse.project, "acme-analytics");
        assert_eq!(config.pipeline.max_in_flight, 64);
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
    }
}
