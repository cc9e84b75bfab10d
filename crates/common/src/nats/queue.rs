use crate::nats::QueueMessage;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Durable pull subscription on a stream with explicit acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableConsumerSpec {
    pub stream_name: String,
    pub durable_name: String,
    pub filter_subject: String,
    /// How long the server waits for a settlement before redelivering
    pub ack_wait: Duration,
}

/// Settles a single delivered message with the queue
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Reject the message; the queue redelivers it after `redeliver_after`
    async fn nak(&self, redeliver_after: Duration) -> Result<()>;

    /// Restart the ack wait of a message that is still being worked on
    async fn in_progress(&self) -> Result<()>;
}

/// A message plus the handle that settles it
pub struct Delivery {
    pub message: QueueMessage,
    pub acknowledger: Box<dyn Acknowledger>,
}

/// Opens durable consumers on the message queue
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    async fn open_consumer(&self, spec: DurableConsumerSpec) -> Result<Box<dyn DeliveryBatches>>;
}

/// Pulls deliveries from an open consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeliveryBatches: Send + Sync {
    /// Up to `max_messages` deliveries, waiting at most `expires` for them.
    /// An empty batch is not an error.
    async fn next_batch(&self, max_messages: usize, expires: Duration) -> Result<Vec<Delivery>>;
}
