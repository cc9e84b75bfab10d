use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Event type published by the device cloud when a device connects or disconnects
pub const DEVICE_STATUS_EVENT: &str = "device/status";

/// One queue-delivered telemetry event with its routing attributes.
///
/// Constructed once per queue message and consumed by a single ingestion pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEnvelope {
    pub id: String,
    pub device_id: String,
    pub event_type: String,
    pub payload: Bytes,
    /// `None` when the publisher did not send a parseable timestamp
    pub published_at: Option<DateTime<Utc>>,
}

impl TelemetryEnvelope {
    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Raw envelope fields as a storable document
    pub fn to_document(&self) -> crate::domain::Document {
        let mut doc = crate::domain::Document::new();
        doc.insert("message_id".to_string(), self.id.clone().into());
        doc.insert("device_id".to_string(), self.device_id.clone().into());
        doc.insert("event".to_string(), self.event_type.clone().into());
        doc.insert("data".to_string(), self.payload_text().into());
        doc.insert(
            "published_at".to_string(),
            self.published_at
                .map(|ts| serde_json::Value::String(ts.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null),
        );
        doc
    }
}
