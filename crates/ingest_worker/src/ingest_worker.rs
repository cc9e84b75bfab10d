use crate::domain::{
    EventClassifier, ReadingSchema, TelemetryIngestionConfig, TelemetryIngestionService,
};
use crate::nats::{TelemetryConsumer, TelemetryConsumerConfig};
use common::domain::{DeviceReachabilityListener, DocumentRepository};
use common::nats::DeliveryQueue;
use relay_runner::AppProcess;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct IngestWorkerConfig {
    pub consumer: TelemetryConsumerConfig,
    pub status_event_type: String,
    pub ingestion: TelemetryIngestionConfig,
}

/// Queue-to-store half of the relay
pub struct IngestWorker {
    consumer: TelemetryConsumer,
}

impl IngestWorker {
    pub async fn new(
        queue: Arc<dyn DeliveryQueue>,
        document_repository: Arc<dyn DocumentRepository>,
        reachability_listener: Arc<dyn DeviceReachabilityListener>,
        config: IngestWorkerConfig,
    ) -> anyhow::Result<Self> {
        let schema = ReadingSchema::v1()?;
        info!(
            schema_version = schema.version(),
            fields = schema.len(),
            status_event = %config.status_event_type,
            unknown_field_policy = ?config.ingestion.unknown_field_policy,
            "initializing ingest worker"
        );

        let ingestion_service = Arc::new(TelemetryIngestionService::new(
            document_repository,
            reachability_listener,
            EventClassifier::new(config.status_event_type),
            schema,
            config.ingestion,
        ));

        let consumer = TelemetryConsumer::new(queue, config.consumer, ingestion_service).await?;

        Ok(Self { consumer })
    }

    pub fn into_runner_process(self) -> AppProcess {
        Box::new({
            let consumer = self.consumer;
            move |ctx| Box::pin(async move { consumer.run(ctx).await })
        })
    }
}
