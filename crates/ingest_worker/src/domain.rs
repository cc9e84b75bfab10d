mod event_classifier;
mod reading_schema;
mod telemetry_ingestion_service;

pub use event_classifier::*;
pub use reading_schema::*;
pub use telemetry_ingestion_service::*;
