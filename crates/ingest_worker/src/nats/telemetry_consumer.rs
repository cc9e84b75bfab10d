use crate::domain::TelemetryIngestionService;
use crate::nats::TelemetryEnvelopeService;
use anyhow::Result;
use common::nats::{
    BatchSettings, DeliveryQueue, DurableConsumerSpec, MessageLogging, MessageLoggingLayer,
    MessageTracing, MessageTracingLayer, ServiceConsumer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::debug;

type TelemetryHandler = MessageTracing<MessageLogging<TelemetryEnvelopeService>>;

/// Where and how the telemetry consumer pulls from JetStream
#[derive(Debug, Clone)]
pub struct TelemetryConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
    /// Redelivery deadline for an unsettled message; progress acks keep
    /// batches behind a slow device call alive
    pub ack_wait_secs: u64,
}

/// Durable JetStream consumer feeding the ingestion service one message at a time
pub struct TelemetryConsumer {
    consumer: ServiceConsumer<TelemetryHandler>,
}

impl TelemetryConsumer {
    pub async fn new(
        queue: Arc<dyn DeliveryQueue>,
        config: TelemetryConsumerConfig,
        ingestion_service: Arc<TelemetryIngestionService>,
    ) -> Result<Self> {
        let handler = ServiceBuilder::new()
            .layer(MessageTracingLayer::new("ingest_telemetry"))
            .layer(MessageLoggingLayer)
            .service(TelemetryEnvelopeService::new(ingestion_service));

        let consumer = ServiceConsumer::new(
            queue,
            DurableConsumerSpec {
                stream_name: config.stream_name,
                durable_name: config.consumer_name,
                filter_subject: config.filter_subject,
                ack_wait: Duration::from_secs(config.ack_wait_secs),
            },
            BatchSettings {
                max_messages: config.batch_size,
                max_wait: Duration::from_secs(config.batch_wait_secs),
            },
            handler,
        )
        .await?;

        Ok(Self { consumer })
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        debug!("starting telemetry consumer");
        self.consumer.run(ctx).await
    }
}
