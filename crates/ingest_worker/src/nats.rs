mod telemetry_consumer;
mod telemetry_envelope_service;

pub use telemetry_consumer::*;
pub use telemetry_envelope_service::*;
