use common::telemetry::LogFormat;
use config::{Config, ConfigError, Environment};
use ingest_worker::domain::UnknownFieldPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Stdout log rendering (json, pretty)
    #[serde(default)]
    pub log_format: LogFormat,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// OTLP gRPC collector endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream carrying telemetry envelopes
    #[serde(default = "default_telemetry_stream")]
    pub telemetry_stream: String,

    /// Subject filter for the telemetry consumer
    #[serde(default = "default_telemetry_subject")]
    pub telemetry_subject: String,

    /// Durable consumer name
    #[serde(default = "default_telemetry_consumer_name")]
    pub telemetry_consumer_name: String,

    /// Batch size for consumer
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Seconds before an unsettled message is redelivered
    #[serde(default = "default_nats_ack_wait_secs")]
    pub nats_ack_wait_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Document store configuration
    /// JetStream key-value bucket holding every collection
    #[serde(default = "default_documents_bucket")]
    pub documents_bucket: String,

    #[serde(default = "default_pending_collection")]
    pub pending_collection: String,

    #[serde(default = "default_applied_collection")]
    pub applied_collection: String,

    #[serde(default = "default_status_collection")]
    pub status_collection: String,

    // Ingestion configuration
    /// Event type reporting device connectivity
    #[serde(default = "default_status_event_type")]
    pub status_event_type: String,

    /// What to do with reading positions the schema does not name
    #[serde(default)]
    pub unknown_field_policy: UnknownFieldPolicy,

    // Device cloud configuration
    #[serde(default = "default_particle_api_url")]
    pub particle_api_url: String,

    /// JSON file with the device cloud account login
    #[serde(default = "default_particle_login_file")]
    pub particle_login_file: String,

    /// Device function receiving interval changes
    #[serde(default = "default_adjust_function")]
    pub adjust_function: String,

    /// Upper bound for one device function call in seconds
    #[serde(default = "default_device_call_timeout_secs")]
    pub device_call_timeout_secs: u64,

    /// Delay before resubscribing to a broken change log watch in seconds
    #[serde(default = "default_resubscribe_delay_secs")]
    pub resubscribe_delay_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "sensor-relay".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_telemetry_stream() -> String {
    "telemetry".to_string()
}

fn default_telemetry_subject() -> String {
    "telemetry.>".to_string()
}

fn default_telemetry_consumer_name() -> String {
    "sensor-relay-ingest".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_nats_ack_wait_secs() -> u64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// Document store defaults
fn default_documents_bucket() -> String {
    "documents".to_string()
}

fn default_pending_collection() -> String {
    interval_dispatcher::domain::DEFAULT_PENDING_COLLECTION.to_string()
}

fn default_applied_collection() -> String {
    interval_dispatcher::domain::DEFAULT_APPLIED_COLLECTION.to_string()
}

fn default_status_collection() -> String {
    "device-status".to_string()
}

fn default_status_event_type() -> String {
    common::domain::DEVICE_STATUS_EVENT.to_string()
}

// Device cloud defaults
fn default_particle_api_url() -> String {
    common::particle::DEFAULT_PARTICLE_API_URL.to_string()
}

fn default_particle_login_file() -> String {
    "particle-login.json".to_string()
}

fn default_adjust_function() -> String {
    interval_dispatcher::domain::DEFAULT_ADJUST_FUNCTION.to_string()
}

fn default_device_call_timeout_secs() -> u64 {
    30
}

fn default_resubscribe_delay_secs() -> u64 {
    5
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("RELAY"))
            .build()?
            .try_deserialize()
    }
}
