use common::postgres::PostgresConfig;
use config::{Config, ConfigError, Environment};
use device_tracker::domain::TopicConfig;
use device_tracker::mqtt::MqttConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Where device records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; state is lost on restart
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // HTTP configuration
    /// Viewer WebSocket endpoint host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    // MQTT configuration
    /// Broker URL (mqtt://host:port)
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default)]
    pub mqtt_username: Option<String>,

    #[serde(default)]
    pub mqtt_password: Option<String>,

    /// Consecutive failed sessions before the subscriber gives up
    #[serde(default = "default_mqtt_max_retry_attempts")]
    pub mqtt_max_retry_attempts: u32,

    #[serde(default = "default_mqtt_retry_delay_secs")]
    pub mqtt_retry_delay_secs: u64,

    // Topic configuration
    /// First segment of flat status topics
    #[serde(default = "default_flat_topic_namespace")]
    pub flat_topic_namespace: String,

    /// Last segment of flat status topics
    #[serde(default = "default_flat_topic_suffix")]
    pub flat_topic_suffix: String,

    /// First segment of mesh envelope topics
    #[serde(default = "default_envelope_topic_root")]
    pub envelope_topic_root: String,

    // Store configuration
    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // Staleness sweep configuration
    /// Seconds between sweeps (default: 15 minutes)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Devices unseen for this many hours are removed
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// HTTP defaults
fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

// MQTT defaults
fn default_mqtt_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "beacon-device-tracker".to_string()
}

fn default_mqtt_max_retry_attempts() -> u32 {
    10
}

fn default_mqtt_retry_delay_secs() -> u64 {
    5
}

// Topic defaults
fn default_flat_topic_namespace() -> String {
    "devices".to_string()
}

fn default_flat_topic_suffix() -> String {
    "status".to_string()
}

fn default_envelope_topic_root() -> String {
    "msh".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "beacon".to_string()
}

fn default_postgres_username() -> String {
    "beacon".to_string()
}

fn default_postgres_password() -> String {
    "beacon".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

// Sweep defaults
fn default_sweep_interval_secs() -> u64 {
    15 * 60
}

fn default_stale_after_hours() -> i64 {
    48
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "beacon".to_string()
}

/// Upper bound on the retention window (ten years)
const MAX_STALE_AFTER_HOURS: i64 = 10 * 365 * 24;

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(Environment::with_prefix("BEACON"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail once the service is running
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if !(1..=MAX_STALE_AFTER_HOURS).contains(&self.stale_after_hours) {
            return Err(ConfigError::Message(format!(
                "stale_after_hours must be between 1 and {}, got {}",
                MAX_STALE_AFTER_HOURS, self.stale_after_hours
            )));
        }

        self.mqtt_config()
            .credentials()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }

    pub fn http_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.http_host, self.http_port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid HTTP address {}: {}", addr, e))
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            broker_url: self.mqtt_broker_url.clone(),
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            max_retry_attempts: self.mqtt_max_retry_attempts,
            retry_delay_secs: self.mqtt_retry_delay_secs,
        }
    }

    pub fn topic_config(&self) -> TopicConfig {
        TopicConfig {
            flat_namespace: self.flat_topic_namespace.clone(),
            flat_suffix: self.flat_topic_suffix.clone(),
            envelope_root: self.envelope_topic_root.clone(),
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_after_hours.clamp(1, MAX_STALE_AFTER_HOURS))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}
