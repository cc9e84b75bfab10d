use crate::nats::{
    Acknowledger, Delivery, DeliveryBatches, DeliveryQueue, DurableConsumerSpec, QueueMessage,
};
use anyhow::{Context, Result, anyhow};
use async_nats::jetstream::{self, AckKind, consumer::pull, kv, stream};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Connection to the NATS server and its JetStream context
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis() as u64, "connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect to NATS at {}", url))?;

        info!(url = %url, "connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
        })
    }

    /// Make sure the telemetry stream exists, capturing `<stream_name>.>`
    pub async fn ensure_stream(&self, stream_name: &str) -> Result<()> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: stream_name.to_string(),
                subjects: vec![format!("{}.>", stream_name)],
                description: Some("Device telemetry envelopes".to_string()),
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to ensure stream {}", stream_name))?;

        debug!(
            stream = %stream_name,
            subjects = ?stream.cached_info().config.subjects,
            "stream ready"
        );
        Ok(())
    }

    /// Open the document bucket, creating it on first use.
    /// Only the latest revision of each key is kept.
    pub async fn ensure_key_value_bucket(&self, bucket: &str) -> Result<kv::Store> {
        if let Ok(store) = self.jetstream.get_key_value(bucket).await {
            debug!(bucket = %bucket, "document bucket ready");
            return Ok(store);
        }

        let store = self
            .jetstream
            .create_key_value(kv::Config {
                bucket: bucket.to_string(),
                description: "Sensor relay documents".to_string(),
                history: 1,
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create document bucket {}", bucket))?;

        info!(bucket = %bucket, "created document bucket");
        Ok(store)
    }

    pub fn queue(&self) -> Arc<dyn DeliveryQueue> {
        Arc::new(JetStreamQueue {
            context: self.jetstream.clone(),
        })
    }

    pub async fn close(self) {
        info!("closing NATS connection");
        if let Err(e) = self.client.flush().await {
            error!(error = %e, "failed to flush NATS connection");
        }
    }
}

struct JetStreamQueue {
    context: jetstream::Context,
}

#[async_trait]
impl DeliveryQueue for JetStreamQueue {
    async fn open_consumer(&self, spec: DurableConsumerSpec) -> Result<Box<dyn DeliveryBatches>> {
        let stream = self
            .context
            .get_stream(&spec.stream_name)
            .await
            .with_context(|| format!("stream {} not found", spec.stream_name))?;

        let consumer = stream
            .get_or_create_consumer(
                &spec.durable_name,
                pull::Config {
                    durable_name: Some(spec.durable_name.clone()),
                    filter_subject: spec.filter_subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: spec.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("failed to open consumer {}", spec.durable_name))?;

        Ok(Box::new(JetStreamBatches { consumer }))
    }
}

struct JetStreamBatches {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl DeliveryBatches for JetStreamBatches {
    async fn next_batch(&self, max_messages: usize, expires: Duration) -> Result<Vec<Delivery>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to fetch messages")?;

        let mut batch = Vec::with_capacity(max_messages);
        while let Some(next) = messages.next().await {
            match next {
                Ok(msg) => batch.push(into_delivery(msg)),
                // The broken message is redelivered once its ack wait expires
                Err(e) => warn!(error = %e, "skipping undeliverable message"),
            }
        }
        Ok(batch)
    }
}

fn into_delivery(msg: jetstream::Message) -> Delivery {
    let info = msg.info().ok().map(|info| (info.stream_sequence, info.delivered));

    let mut message = QueueMessage::new(
        msg.subject.to_string(),
        msg.payload.clone(),
        msg.headers.clone(),
    );
    let published_id = message.header(MSG_ID_HEADER).map(str::to_string);
    if let Some(id) = published_id.or_else(|| info.map(|(sequence, _)| sequence.to_string())) {
        message = message.with_message_id(id);
    }
    if let Some((_, delivered)) = info {
        message = message.with_delivery_attempt(delivered.max(1) as u64);
    }

    Delivery {
        message,
        acknowledger: Box::new(JetStreamAcknowledger(msg)),
    }
}

struct JetStreamAcknowledger(jetstream::Message);

#[async_trait]
impl Acknowledger for JetStreamAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.0.ack().await.map_err(|e| anyhow!("ack failed: {}", e))
    }

    async fn nak(&self, redeliver_after: Duration) -> Result<()> {
        self.0
            .ack_with(AckKind::Nak(Some(redeliver_after)))
            .await
            .map_err(|e| anyhow!("nak failed: {}", e))
    }

    async fn in_progress(&self) -> Result<()> {
        self.0
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| anyhow!("progress ack failed: {}", e))
    }
}
