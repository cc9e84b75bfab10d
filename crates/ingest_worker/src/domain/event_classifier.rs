use common::domain::{DEVICE_STATUS_EVENT, DomainError, DomainResult, TelemetryEnvelope};
use serde_json::Value;

const STATUS_ONLINE: &str = "online";
const STATUS_OFFLINE: &str = "offline";

/// Connectivity report from the device cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// `None` when the status text is neither `online` nor `offline`
    pub online: Option<bool>,
    pub raw: String,
}

impl StatusEvent {
    /// Only an explicit `online` report signals reachability
    pub fn signals_reachable(&self) -> bool {
        self.online == Some(true)
    }
}

/// Sensor payload parsed into reading groups, one per sample
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingEvent {
    pub groups: Vec<Vec<Value>>,
}

/// Payload that is not a reading set; stored as the raw envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueEvent {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedEvent {
    Status(StatusEvent),
    Reading(ReadingEvent),
    Opaque(OpaqueEvent),
}

/// Routes an envelope by event type and payload shape
#[derive(Debug, Clone)]
pub struct EventClassifier {
    status_event_type: String,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new(DEVICE_STATUS_EVENT)
    }
}

impl EventClassifier {
    pub fn new(status_event_type: impl Into<String>) -> Self {
        Self {
            status_event_type: status_event_type.into(),
        }
    }

    pub fn classify(&self, envelope: &TelemetryEnvelope) -> ClassifiedEvent {
        if envelope.event_type == self.status_event_type {
            return ClassifiedEvent::Status(classify_status(envelope.payload_text()));
        }

        match parse_reading_groups(&envelope.payload) {
            Ok(groups) => ClassifiedEvent::Reading(ReadingEvent { groups }),
            Err(e) => ClassifiedEvent::Opaque(OpaqueEvent {
                reason: e.to_string(),
            }),
        }
    }
}

fn classify_status(raw: String) -> StatusEvent {
    let online = match raw.as_str() {
        STATUS_ONLINE => Some(true),
        STATUS_OFFLINE => Some(false),
        _ => None,
    };
    StatusEvent { online, raw }
}

/// Parse a payload shaped as a JSON array of arrays of readings
pub fn parse_reading_groups(payload: &[u8]) -> DomainResult<Vec<Vec<Value>>> {
    serde_json::from_slice::<Vec<Vec<Value>>>(payload)
        .map_err(|e| DomainError::PayloadParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn envelope(event_type: &str, payload: &'static str) -> TelemetryEnvelope {
        TelemetryEnvelope {
            id: "1".to_string(),
            device_id: "e00fce68".to_string(),
            event_type: event_type.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            published_at: None,
        }
    }

    #[test]
    fn test_status_online_signals_reachable() {
        let classifier = EventClassifier::default();
        match classifier.classify(&envelope("device/status", "online")) {
            ClassifiedEvent::Status(status) => {
                assert_eq!(status.online, Some(true));
                assert!(status.signals_reachable());
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_status_offline() {
        let classifier = EventClassifier::default();
        assert_eq!(
            classifier.classify(&envelope("device/status", "offline")),
            ClassifiedEvent::Status(StatusEvent {
                online: Some(false),
                raw: "offline".to_string()
            })
        );
    }

    #[test]
    fn test_other_status_text_keeps_raw_without_signal() {
        let classifier = EventClassifier::default();
        match classifier.classify(&envelope("device/status", "auto-update")) {
            ClassifiedEvent::Status(status) => {
                assert_eq!(status.online, None);
                assert_eq!(status.raw, "auto-update");
                assert!(!status.signals_reachable());
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_status_is_never_parsed_as_readings() {
        let classifier = EventClassifier::default();
        assert!(matches!(
            classifier.classify(&envelope("device/status", "[[1,2]]")),
            ClassifiedEvent::Status(_)
        ));
    }

    #[test]
    fn test_configured_status_event_type() {
        let classifier = EventClassifier::new("spark/status");
        assert!(matches!(
            classifier.classify(&envelope("spark/status", "online")),
            ClassifiedEvent::Status(_)
        ));
        assert!(matches!(
            classifier.classify(&envelope("device/status", "online")),
            ClassifiedEvent::Opaque(_)
        ));
    }

    #[test]
    fn test_reading_groups() {
        let classifier = EventClassifier::default();
        let event = classifier.classify(&envelope(
            "sensor-readings",
            "[[1700000000,120],[1700000060,118,\"x\"]]",
        ));
        assert_eq!(
            event,
            ClassifiedEvent::Reading(ReadingEvent {
                groups: vec![
                    vec![json!(1700000000), json!(120)],
                    vec![json!(1700000060), json!(118), json!("x")],
                ]
            })
        );
    }

    #[test]
    fn test_empty_array_is_zero_groups() {
        let classifier = EventClassifier::default();
        assert_eq!(
            classifier.classify(&envelope("sensor-readings", "[]")),
            ClassifiedEvent::Reading(ReadingEvent { groups: vec![] })
        );
    }

    #[test]
    fn test_non_reading_payloads_are_opaque() {
        let classifier = EventClassifier::default();
        for payload in ["not json", "{\"a\":1}", "[1,2,3]", "42", "\"online\"", ""] {
            assert!(
                matches!(
                    classifier.classify(&envelope("sensor-readings", payload)),
                    ClassifiedEvent::Opaque(_)
                ),
                "expected opaque for {payload:?}"
            );
        }
    }

    #[test]
    fn test_parse_error_variant() {
        assert!(matches!(
            parse_reading_groups(b"not json"),
            Err(DomainError::PayloadParseError(_))
        ));
    }
}
