use crate::domain::{
    ClassifiedEvent, EventClassifier, OpaqueEvent, ReadingEvent, ReadingSchema, StatusEvent,
    UnknownFieldPolicy,
};
use chrono::Utc;
use common::domain::{
    AddDocumentRepoInput, DeviceReachabilityListener, Document, DocumentRepository, DomainError,
    DomainResult, SetDocumentRepoInput, TelemetryEnvelope,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Collection holding one status record per device
pub const DEFAULT_STATUS_COLLECTION: &str = "device-status";

#[derive(Debug, Clone)]
pub struct TelemetryIngestionConfig {
    pub status_collection: String,
    pub unknown_field_policy: UnknownFieldPolicy,
}

impl Default for TelemetryIngestionConfig {
    fn default() -> Self {
        Self {
            status_collection: DEFAULT_STATUS_COLLECTION.to_string(),
            unknown_field_policy: UnknownFieldPolicy::default(),
        }
    }
}

/// What an ingestion pass stored for an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Status { online: Option<bool> },
    Readings { stored: usize, rejected: usize },
    Opaque,
}

/// Routes each envelope to the matching write path.
///
/// - status: merge `{Timestamp, online | data}` into the device's status record,
///   then signal reachability when the device came online
/// - readings: one document per reading group in the device's collection
/// - anything else: the raw envelope as one document in the device's collection
///
/// A store failure aborts the pass with an error so the message is redelivered;
/// groups written before the failure stay written.
pub struct TelemetryIngestionService {
    document_repository: Arc<dyn DocumentRepository>,
    reachability_listener: Arc<dyn DeviceReachabilityListener>,
    classifier: EventClassifier,
    schema: ReadingSchema,
    config: TelemetryIngestionConfig,
}

impl TelemetryIngestionService {
    pub fn new(
        document_repository: Arc<dyn DocumentRepository>,
        reachability_listener: Arc<dyn DeviceReachabilityListener>,
        classifier: EventClassifier,
        schema: ReadingSchema,
        config: TelemetryIngestionConfig,
    ) -> Self {
        Self {
            document_repository,
            reachability_listener,
            classifier,
            schema,
            config,
        }
    }

    #[instrument(
        skip(self, envelope),
        fields(
            device_id = %envelope.device_id,
            event = %envelope.event_type,
            message_id = %envelope.id
        )
    )]
    pub async fn ingest(&self, envelope: TelemetryEnvelope) -> DomainResult<IngestOutcome> {
        match self.classifier.classify(&envelope) {
            ClassifiedEvent::Status(status) => self.handle_status(&envelope, status).await,
            ClassifiedEvent::Reading(readings) => self.handle_readings(&envelope, readings).await,
            ClassifiedEvent::Opaque(opaque) => self.handle_opaque(&envelope, opaque).await,
        }
    }

    async fn handle_status(
        &self,
        envelope: &TelemetryEnvelope,
        status: StatusEvent,
    ) -> DomainResult<IngestOutcome> {
        let timestamp = envelope.published_at.unwrap_or_else(Utc::now);

        let mut record = Document::new();
        record.insert("Timestamp".to_string(), Value::String(timestamp.to_rfc3339()));
        match status.online {
            Some(online) => {
                record.insert("online".to_string(), Value::Bool(online));
            }
            None => {
                record.insert("data".to_string(), Value::String(status.raw.clone()));
            }
        }

        self.document_repository
            .set_document(SetDocumentRepoInput {
                collection: self.config.status_collection.clone(),
                document_id: envelope.device_id.clone(),
                document: record,
                merge: true,
            })
            .await?;

        info!(online = ?status.online, "device status recorded");

        if status.signals_reachable() {
            self.reachability_listener
                .on_device_reachable(&envelope.device_id)
                .await;
        }

        Ok(IngestOutcome::Status {
            online: status.online,
        })
    }

    async fn handle_readings(
        &self,
        envelope: &TelemetryEnvelope,
        readings: ReadingEvent,
    ) -> DomainResult<IngestOutcome> {
        let mut stored = 0;
        let mut rejected = 0;

        for (group_index, group) in readings.groups.iter().enumerate() {
            let record = match self
                .schema
                .decode_with_policy(group, self.config.unknown_field_policy)
            {
                Ok(record) => record,
                Err(e @ DomainError::UnknownFieldIndex { .. }) => {
                    warn!(group = group_index, error = %e, "rejecting reading group");
                    rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let document_id = self
                .document_repository
                .add_document(AddDocumentRepoInput {
                    collection: envelope.device_id.clone(),
                    document: record,
                })
                .await?;

            debug!(group = group_index, document_id = %document_id, "reading group stored");
            stored += 1;
        }

        info!(
            groups = readings.groups.len(),
            stored, rejected, "sensor readings stored"
        );
        Ok(IngestOutcome::Readings { stored, rejected })
    }

    async fn handle_opaque(
        &self,
        envelope: &TelemetryEnvelope,
        opaque: OpaqueEvent,
    ) -> DomainResult<IngestOutcome> {
        debug!(reason = %opaque.reason, "payload is not a reading set, storing as-is");

        self.document_repository
            .add_document(AddDocumentRepoInput {
                collection: envelope.device_id.clone(),
                document: envelope.to_document(),
            })
            .await?;

        info!("event stored as-is");
        Ok(IngestOutcome::Opaque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use common::domain::{MockDeviceReachabilityListener, MockDocumentRepository};
    use serde_json::json;

    fn envelope(event_type: &str, payload: &'static str) -> TelemetryEnvelope {
        TelemetryEnvelope {
            id: "7".to_string(),
            device_id: "e00fce68".to_string(),
            event_type: event_type.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    fn service(
        repo: MockDocumentRepository,
        listener: MockDeviceReachabilityListener,
        policy: UnknownFieldPolicy,
    ) -> TelemetryIngestionService {
        TelemetryIngestionService::new(
            Arc::new(repo),
            Arc::new(listener),
            EventClassifier::default(),
            ReadingSchema::v1().unwrap(),
            TelemetryIngestionConfig {
                status_collection: "device-status".to_string(),
                unknown_field_policy: policy,
            },
        )
    }

    #[tokio::test]
    async fn test_online_status_merges_record_then_signals_reachable() {
        let mut repo = MockDocumentRepository::new();
        let mut listener = MockDeviceReachabilityListener::new();
        let mut seq = mockall::Sequence::new();

        repo.expect_set_document()
            .withf(|input| {
                input.collection == "device-status"
                    && input.document_id == "e00fce68"
                    && input.merge
                    && input.document.get("online") == Some(&json!(true))
                    && input.document.get("Timestamp")
                        == Some(&json!("2024-03-01T12:00:00+00:00"))
                    && !input.document.contains_key("data")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        listener
            .expect_on_device_reachable()
            .withf(|device_id| device_id == "e00fce68")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());

        let outcome = service(repo, listener, UnknownFieldPolicy::default())
            .ingest(envelope("device/status", "online"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Status { online: Some(true) });
    }

    #[tokio::test]
    async fn test_offline_status_does_not_signal() {
        let mut repo = MockDocumentRepository::new();
        let mut listener = MockDeviceReachabilityListener::new();

        repo.expect_set_document()
            .withf(|input| input.document.get("online") == Some(&json!(false)))
            .times(1)
            .returning(|_| Ok(()));
        listener.expect_on_device_reachable().never();

        service(repo, listener, UnknownFieldPolicy::default())
            .ingest(envelope("device/status", "offline"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_status_stores_raw_data_only() {
        let mut repo = MockDocumentRepository::new();
        let mut listener = MockDeviceReachabilityListener::new();

        repo.expect_set_document()
            .withf(|input| {
                input.document.get("data") == Some(&json!("auto-update"))
                    && !input.document.contains_key("online")
            })
            .times(1)
            .returning(|_| Ok(()));
        listener.expect_on_device_reachable().never();

        let outcome = service(repo, listener, UnknownFieldPolicy::default())
            .ingest(envelope("device/status", "auto-update"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Status { online: None });
    }

    #[tokio::test]
    async fn test_status_write_failure_skips_dispatch_and_errors() {
        let mut repo = MockDocumentRepository::new();
        let mut listener = MockDeviceReachabilityListener::new();

        repo.expect_set_document()
            .times(1)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("bucket offline"))));
        listener.expect_on_device_reachable().never();

        let result = service(repo, listener, UnknownFieldPolicy::default())
            .ingest(envelope("device/status", "online"))
            .await;
        assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    }

    #[tokio::test]
    async fn test_each_reading_group_is_one_document() {
        let mut repo = MockDocumentRepository::new();
        let listener = MockDeviceReachabilityListener::new();

        repo.expect_add_document()
            .withf(|input| {
                input.collection == "e00fce68"
                    && input.document.get("Timestamp").is_some()
                    && input.document.get("Light level (lux)").is_some()
            })
            .times(2)
            .returning(|_| Ok(xid::new().to_string()));

        let outcome = service(repo, listener, UnknownFieldPolicy::default())
            .ingest(envelope(
                "sensor-readings",
                "[[1700000000,120,45],[1700000060,118,44]]",
            ))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Readings { stored: 2, rejected: 0 });
    }

    #[tokio::test]
    async fn test_empty_reading_set_writes_nothing() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document().never();

        let outcome = service(
            repo,
            MockDeviceReachabilityListener::new(),
            UnknownFieldPolicy::default(),
        )
        .ingest(envelope("sensor-readings", "[]"))
        .await
        .unwrap();
        assert_eq!(outcome, IngestOutcome::Readings { stored: 0, rejected: 0 });
    }

    #[tokio::test]
    async fn test_reject_policy_skips_oversized_group_only() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document()
            .withf(|input| input.document.len() == 2)
            .times(1)
            .returning(|_| Ok("id".to_string()));

        let outcome = service(
            repo,
            MockDeviceReachabilityListener::new(),
            UnknownFieldPolicy::Reject,
        )
        .ingest(envelope(
            "sensor-readings",
            "[[0,1,2,3,4,5,6,7,8,9,10,11,12],[1700000000,120]]",
        ))
        .await
        .unwrap();
        assert_eq!(outcome, IngestOutcome::Readings { stored: 1, rejected: 1 });
    }

    #[tokio::test]
    async fn test_store_verbatim_policy_keeps_unknown_positions() {
        let mut repo = MockDocumentRepository::new();
        repo.expect_add_document()
            .withf(|input| input.document.get("12") == Some(&json!(12)))
            .times(1)
            .returning(|_| Ok("id".to_string()));

        let outcome = service(
            repo,
            MockDeviceReachabilityListener::new(),
            UnknownFieldPolicy::StoreVerbatim,
        )
        .ingest(envelope("sensor-readings", "[[0,1,2,3,4,5,6,7,8,9,10,11,12]]"))
        .await
        .unwrap();
        assert_eq!(outcome, IngestOutcome::Readings { stored: 1, rejected: 0 });
    }

    #[tokio::test]
    async fn test_failed_group_write_aborts_remaining_groups() {
        let mut repo = MockDocumentRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_add_document()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("first".to_string()));
        repo.expect_add_document()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("timeout"))));

        let result = service(
            repo,
            MockDeviceReachabilityListener::new(),
            UnknownFieldPolicy::default(),
        )
        .ingest(envelope("sensor-readings", "[[1],[2],[3]]"))
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_json_payload_stored_as_raw_envelope() {
        let mut repo = MockDocumentRepository::new();
        let mut listener = MockDeviceReachabilityListener::new();

        repo.expect_add_document()
            .withf(|input| {
                input.collection == "e00fce68"
                    && input.document.get("message_id") == Some(&json!("7"))
                    && input.document.get("device_id") == Some(&json!("e00fce68"))
                    && input.document.get("event") == Some(&json!("sensor-readings"))
                    && input.document.get("data") == Some(&json!("not json"))
                    && input.document.get("published_at")
                        == Some(&json!("2024-03-01T12:00:00+00:00"))
            })
            .times(1)
            .returning(|_| Ok("id".to_string()));
        listener.expect_on_device_reachable().never();

        let outcome = service(repo, listener, UnknownFieldPolicy::default())
            .ingest(envelope("sensor-readings", "not json"))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Opaque);
    }
}
