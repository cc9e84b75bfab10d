use crate::nats::{
    Acknowledger, Delivery, DeliveryBatches, DeliveryQueue, Disposition, DurableConsumerSpec,
    QueueMessage,
};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Delay before JetStream redelivers a message handed back for retry
pub const RETRY_REDELIVERY_DELAY: Duration = Duration::from_secs(5);

const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(10);

/// How many messages to pull at once and how long to wait for them
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub max_messages: usize,
    pub max_wait: Duration,
}

/// Drives a durable consumer through a Tower service.
///
/// Deliveries are handled strictly one after another in queue order. A
/// message is settled only after its handler future has completed, so
/// nothing is acknowledged before its effects are durable.
///
/// While a handler runs, every unsettled message of the batch gets a progress
/// ack each half ack wait, so a slow handler never lets the server redeliver
/// messages that are still queued behind it.
pub struct ServiceConsumer<S> {
    batches: Box<dyn DeliveryBatches>,
    spec: DurableConsumerSpec,
    settings: BatchSettings,
    progress_interval: Duration,
    service: S,
}

impl<S> ServiceConsumer<S>
where
    S: Service<QueueMessage, Response = Disposition, Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        queue: Arc<dyn DeliveryQueue>,
        spec: DurableConsumerSpec,
        settings: BatchSettings,
        service: S,
    ) -> Result<Self> {
        let batches = queue
            .open_consumer(spec.clone())
            .await
            .with_context(|| format!("failed to open consumer {}", spec.durable_name))?;

        debug!(
            stream = %spec.stream_name,
            consumer = %spec.durable_name,
            filter_subject = %spec.filter_subject,
            ack_wait_ms = spec.ack_wait.as_millis() as u64,
            "durable consumer opened"
        );

        Ok(Self {
            batches,
            progress_interval: (spec.ack_wait / 2).max(MIN_PROGRESS_INTERVAL),
            spec,
            settings,
            service,
        })
    }

    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(consumer = %self.spec.durable_name, "consumer started");

        while !ctx.is_cancelled() {
            let next = self
                .batches
                .next_batch(self.settings.max_messages, self.settings.max_wait);
            let batch = tokio::select! {
                _ = ctx.cancelled() => break,
                batch = next => batch,
            };

            match batch {
                // A batch in progress is finished even when cancelled mid-way
                Ok(deliveries) => self.handle_batch(deliveries).await,
                Err(e) => {
                    error!(consumer = %self.spec.durable_name, error = %e, "failed to fetch batch");
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(consumer = %self.spec.durable_name, "consumer stopped");
        Ok(())
    }

    async fn handle_batch(&mut self, deliveries: Vec<Delivery>) {
        if deliveries.is_empty() {
            return;
        }
        debug!(messages = deliveries.len(), "handling batch");

        let mut queued = VecDeque::from(deliveries);
        while let Some(Delivery {
            message,
            acknowledger,
        }) = queued.pop_front()
        {
            let subject = message.subject.clone();
            let service = &mut self.service;
            let call = async move {
                match service.ready().await {
                    Ok(service) => service.call(message).await,
                    Err(e) => Err(e),
                }
            };
            tokio::pin!(call);

            let mut heartbeat = tokio::time::interval_at(
                Instant::now() + self.progress_interval,
                self.progress_interval,
            );
            let result = loop {
                tokio::select! {
                    result = &mut call => break result,
                    _ = heartbeat.tick() => {
                        debug!(
                            subject = %subject,
                            queued = queued.len(),
                            "handler still running, extending ack wait"
                        );
                        mark_in_progress(acknowledger.as_ref()).await;
                        for waiting in &queued {
                            mark_in_progress(waiting.acknowledger.as_ref()).await;
                        }
                    }
                }
            };

            let disposition = result.unwrap_or_else(|e| {
                error!(subject = %subject, error = %e, "handler failed");
                Disposition::retry(e.to_string())
            });
            settle(&subject, acknowledger.as_ref(), &disposition).await;
        }
    }
}

async fn settle(subject: &str, acknowledger: &dyn Acknowledger, disposition: &Disposition) {
    match disposition {
        Disposition::Ack => {}
        Disposition::Drop(reason) => {
            warn!(subject = %subject, reason = %reason, "dropping message")
        }
        Disposition::Retry(reason) => {
            warn!(subject = %subject, reason = %reason, "message handed back for redelivery")
        }
    }

    let settled = if disposition.acknowledges() {
        acknowledger.ack().await
    } else {
        acknowledger.nak(RETRY_REDELIVERY_DELAY).await
    };
    if let Err(e) = settled {
        error!(
            subject = %subject,
            outcome = disposition.label(),
            error = %e,
            "failed to settle message"
        );
    }
}

async fn mark_in_progress(acknowledger: &dyn Acknowledger) {
    if let Err(e) = acknowledger.in_progress().await {
        warn!(error = %e, "failed to extend ack wait");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::{MockAcknowledger, MockDeliveryBatches, MockDeliveryQueue};
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use std::sync::Mutex;
    use std::task::{Context as TaskContext, Poll};

    /// Settles by payload: "ok" acks, "slow" acks after 150ms, "bad" drops,
    /// anything else retries. Records the order messages were seen in.
    #[derive(Clone, Default)]
    struct ScriptedHandler {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Service<QueueMessage> for ScriptedHandler {
        type Response = Disposition;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<Disposition, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, msg: QueueMessage) -> Self::Future {
            let seen = self.seen.clone();
            Box::pin(async move {
                let payload = String::from_utf8_lossy(&msg.payload).to_string();
                seen.lock().unwrap().push(msg.subject.clone());
                match payload.as_str() {
                    "ok" => Ok(Disposition::Ack),
                    "slow" => {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok(Disposition::Ack)
                    }
                    "bad" => Ok(Disposition::drop("malformed")),
                    "boom" => Err(anyhow::anyhow!("handler crashed")),
                    _ => Ok(Disposition::retry("store unavailable")),
                }
            })
        }
    }

    fn spec() -> DurableConsumerSpec {
        DurableConsumerSpec {
            stream_name: "telemetry".to_string(),
            durable_name: "relay-ingest".to_string(),
            filter_subject: "telemetry.>".to_string(),
            ack_wait: Duration::from_secs(30),
        }
    }

    fn settings() -> BatchSettings {
        BatchSettings {
            max_messages: 10,
            max_wait: Duration::from_millis(10),
        }
    }

    fn delivery(subject: &str, payload: &'static str, expect_ack: bool) -> Delivery {
        let mut acknowledger = MockAcknowledger::new();
        if expect_ack {
            acknowledger.expect_ack().times(1).returning(|| Ok(()));
            acknowledger.expect_nak().never();
        } else {
            acknowledger.expect_ack().never();
            acknowledger
                .expect_nak()
                .withf(|delay| *delay == RETRY_REDELIVERY_DELAY)
                .times(1)
                .returning(|_| Ok(()));
        }
        Delivery {
            message: QueueMessage::new(subject, Bytes::from_static(payload.as_bytes()), None),
            acknowledger: Box::new(acknowledger),
        }
    }

    /// Acked once, after at least one progress ack
    fn slow_delivery(subject: &str, payload: &'static str) -> Delivery {
        let mut acknowledger = MockAcknowledger::new();
        acknowledger
            .expect_in_progress()
            .times(1..)
            .returning(|| Ok(()));
        acknowledger.expect_ack().times(1).returning(|| Ok(()));
        acknowledger.expect_nak().never();
        Delivery {
            message: QueueMessage::new(subject, Bytes::from_static(payload.as_bytes()), None),
            acknowledger: Box::new(acknowledger),
        }
    }

    fn queue_with(batches: MockDeliveryBatches) -> Arc<dyn DeliveryQueue> {
        let mut queue = MockDeliveryQueue::new();
        let mut batches = Some(batches);
        queue
            .expect_open_consumer()
            .withf(|spec| spec.durable_name == "relay-ingest" && spec.stream_name == "telemetry")
            .times(1)
            .returning(move |_| {
                Ok(Box::new(batches.take().unwrap_or_else(MockDeliveryBatches::new)))
            });
        Arc::new(queue)
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let mut queue = MockDeliveryQueue::new();
        queue
            .expect_open_consumer()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("stream telemetry not found")));

        let result =
            ServiceConsumer::new(Arc::new(queue), spec(), settings(), ScriptedHandler::default())
                .await;
        let err = result.err().unwrap();
        assert!(format!("{:#}", err).contains("relay-ingest"));
    }

    #[tokio::test]
    async fn test_each_message_is_settled_by_its_disposition_in_order() {
        let handler = ScriptedHandler::default();
        let mut consumer = ServiceConsumer::new(
            queue_with(MockDeliveryBatches::new()),
            spec(),
            settings(),
            handler.clone(),
        )
        .await
        .unwrap();

        consumer
            .handle_batch(vec![
                delivery("telemetry.a", "ok", true),
                delivery("telemetry.b", "bad", true),
                delivery("telemetry.c", "later", false),
                delivery("telemetry.d", "boom", false),
                delivery("telemetry.e", "ok", true),
            ])
            .await;

        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec!["telemetry.a", "telemetry.b", "telemetry.c", "telemetry.d", "telemetry.e"]
        );
    }

    #[tokio::test]
    async fn test_slow_handler_keeps_whole_batch_in_progress() {
        let handler = ScriptedHandler::default();
        let mut consumer = ServiceConsumer::new(
            queue_with(MockDeliveryBatches::new()),
            DurableConsumerSpec {
                ack_wait: Duration::from_millis(60),
                ..spec()
            },
            settings(),
            handler.clone(),
        )
        .await
        .unwrap();

        consumer
            .handle_batch(vec![
                slow_delivery("telemetry.a", "slow"),
                slow_delivery("telemetry.b", "ok"),
            ])
            .await;

        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec!["telemetry.a", "telemetry.b"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_survives_fetch_errors_and_stops_on_cancel() {
        let mut batches = MockDeliveryBatches::new();
        let mut seq = mockall::Sequence::new();
        batches
            .expect_next_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("no responders")));
        batches
            .expect_next_batch()
            .withf(|max, _| *max == 10)
            .returning(|_, _| Ok(vec![]));

        let consumer = ServiceConsumer::new(
            queue_with(batches),
            spec(),
            settings(),
            ScriptedHandler::default(),
        )
        .await
        .unwrap();

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(ctx.clone()));
        tokio::time::sleep(FETCH_ERROR_BACKOFF + Duration::from_millis(100)).await;
        ctx.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer should stop on cancel")
            .unwrap()
            .unwrap();
    }
}
