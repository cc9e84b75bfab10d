use crate::domain::TelemetryIngestionService;
use chrono::{DateTime, Utc};
use common::domain::{DomainError, DomainResult, TelemetryEnvelope};
use common::nats::{Disposition, QueueMessage};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error, warn};

pub const DEVICE_ID_HEADER: &str = "device_id";
pub const EVENT_HEADER: &str = "event";
pub const PUBLISHED_AT_HEADER: &str = "published_at";

/// Build an envelope from a consumed message's routing headers and payload
pub fn decode_envelope(msg: &QueueMessage) -> DomainResult<TelemetryEnvelope> {
    let device_id = msg.header(DEVICE_ID_HEADER).ok_or_else(|| {
        DomainError::EnvelopeDecodeError(format!("missing {} header", DEVICE_ID_HEADER))
    })?;
    let event_type = msg.header(EVENT_HEADER).ok_or_else(|| {
        DomainError::EnvelopeDecodeError(format!("missing {} header", EVENT_HEADER))
    })?;

    let published_at = msg.header(PUBLISHED_AT_HEADER).and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .inspect_err(|e| debug!(value = %raw, error = %e, "ignoring unparseable published_at"))
            .ok()
    });

    Ok(TelemetryEnvelope {
        id: msg
            .message_id
            .clone()
            .unwrap_or_else(|| xid::new().to_string()),
        device_id: device_id.to_string(),
        event_type: event_type.to_string(),
        payload: msg.payload.clone(),
        published_at,
    })
}

/// Tower service that ingests one telemetry message.
///
/// Undecodable envelopes and documents the store can never accept are
/// dropped; any other failure hands the message back for redelivery.
#[derive(Clone)]
pub struct TelemetryEnvelopeService {
    ingestion_service: Arc<TelemetryIngestionService>,
}

impl TelemetryEnvelopeService {
    pub fn new(ingestion_service: Arc<TelemetryIngestionService>) -> Self {
        Self { ingestion_service }
    }
}

impl Service<QueueMessage> for TelemetryEnvelopeService {
    type Response = Disposition;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Disposition, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, msg: QueueMessage) -> Self::Future {
        let ingestion_service = Arc::clone(&self.ingestion_service);

        Box::pin(async move {
            let envelope = match decode_envelope(&msg) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(subject = %msg.subject, error = %e, "undecodable envelope");
                    return Ok(Disposition::drop(e.to_string()));
                }
            };

            let device_id = envelope.device_id.clone();

            match ingestion_service.ingest(envelope).await {
                Ok(outcome) => {
                    debug!(device_id = %device_id, outcome = ?outcome, "envelope ingested");
                    Ok(Disposition::Ack)
                }
                Err(e @ (DomainError::InvalidDocumentKey(_) | DomainError::InvalidDocument(_))) => {
                    warn!(device_id = %device_id, error = %e, "envelope the store cannot accept");
                    Ok(Disposition::drop(e.to_string()))
                }
                Err(e) => {
                    error!(device_id = %device_id, error = %e, "failed to ingest envelope");
                    Ok(Disposition::retry(e.to_string()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventClassifier, ReadingSchema, TelemetryIngestionConfig};
    use async_nats::HeaderMap;
    use bytes::Bytes;
    use common::domain::{MockDeviceReachabilityListener, MockDocumentRepository};
    use tower::ServiceExt;

    fn message(headers: &[(&str, &str)], payload: &'static str) -> QueueMessage {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, *value);
        }
        QueueMessage::new(
            "telemetry.e00fce68",
            Bytes::from_static(payload.as_bytes()),
            Some(map),
        )
        .with_message_id("12")
    }

    fn service(repo: MockDocumentRepository) -> TelemetryEnvelopeService {
        TelemetryEnvelopeService::new(Arc::new(TelemetryIngestionService::new(
            Arc::new(repo),
            Arc::new(MockDeviceReachabilityListener::new()),
            EventClassifier::default(),
            ReadingSchema::v1().unwrap(),
            TelemetryIngestionConfig::default(),
        )))
    }

    #[test]
    fn test_decode_envelope_reads_routing_headers() {
        let msg = message(
            &[
                ("device_id", "e00fce68"),
                ("event", "sensor-readings"),
                ("published_at", "2024-03-01T12:00:00.000Z"),
            ],
            "[[1]]",
        );

        let envelope = decode_envelope(&msg).unwrap();
        assert_eq!(envelope.id, "12");
        assert_eq!(envelope.device_id, "e00fce68");
        assert_eq!(envelope.event_type, "sensor-readings");
        assert_eq!(envelope.payload, Bytes::from_static(b"[[1]]"));
        assert_eq!(
            envelope.published_at.unwrap().to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_decode_envelope_tolerates_bad_timestamp() {
        let msg = message(
            &[("device_id", "dev"), ("event", "x"), ("published_at", "yesterday")],
            "",
        );
        assert!(decode_envelope(&msg).unwrap().published_at.is_none());
    }

    #[test]
    fn test_decode_envelope_requires_device_and_event() {
        let missing_device = message(&[("event", "x")], "");
        assert!(matches!(
            decode_envelope(&missing_device),
            Err(DomainError::EnvelopeDecodeError(_))
        ));

        let missing_event = message(&[("device_id", "dev")], "");
        assert!(matches!(
            decode_envelope(&missing_event),
            Err(DomainError::EnvelopeDecodeError(_))
        ));

        let no_headers = QueueMessage::new("telemetry.x", Bytes::new(), None);
        assert!(decode_envelope(&no_headers).is_err());
    }

    #[tokio::test]
    async fn test_undecodable_envelope_is_dropped_without_writes() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document().never();

        let disposition = service(repo)
            .oneshot(message(&[("event", "x")], "not json"))
            .await
            .unwrap();
        assert!(matches!(disposition, Disposition::Drop(_)));
    }

    #[tokio::test]
    async fn test_ingested_envelope_is_acked() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document()
            .times(1)
            .returning(|_| Ok("id".to_string()));

        let disposition = service(repo)
            .oneshot(message(&[("device_id", "dev"), ("event", "x")], "not json"))
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_store_failure_is_retried() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("no responders"))));

        let disposition = service(repo)
            .oneshot(message(&[("device_id", "dev"), ("event", "x")], "not json"))
            .await
            .unwrap();
        assert!(matches!(disposition, Disposition::Retry(_)));
    }

    #[tokio::test]
    async fn test_invalid_key_is_dropped() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document()
            .times(1)
            .returning(|_| Err(DomainError::InvalidDocumentKey("bad.id".to_string())));

        let disposition = service(repo)
            .oneshot(message(&[("device_id", "bad.id"), ("event", "x")], "not json"))
            .await
            .unwrap();
        assert!(matches!(disposition, Disposition::Drop(_)));
    }
}
