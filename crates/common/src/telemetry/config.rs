use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider};
use serde::{Deserialize, Serialize};

/// How log lines are rendered on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line, with the active span list
    #[default]
    Json,
    /// Human readable multi-line output for local runs
    Pretty,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Reported as `service.name` on exported spans and logs
    pub service_name: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    pub log_format: LogFormat,
    /// OTLP/gRPC collector; no export when `None`
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "sensor-relay".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            otlp_endpoint: None,
        }
    }
}

/// Exporters that must be shut down to flush buffered spans and logs
pub struct TelemetryProviders {
    pub tracer_provider: TracerProvider,
    pub logger_provider: LoggerProvider,
}
