use crate::nats::{Disposition, QueueMessage};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{error, info, warn};

/// Logs one line per handled message with its size, delivery attempt,
/// outcome and latency
#[derive(Clone, Copy, Default)]
pub struct MessageLoggingLayer;

impl<S> Layer<S> for MessageLoggingLayer {
    type Service = MessageLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MessageLogging { inner }
    }
}

#[derive(Clone)]
pub struct MessageLogging<S> {
    inner: S,
}

impl<S> Service<QueueMessage> for MessageLogging<S>
where
    S: Service<QueueMessage, Response = Disposition>,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
{
    type Response = Disposition;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Disposition, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, msg: QueueMessage) -> Self::Future {
        let subject = msg.subject.clone();
        let message_id = msg.message_id.clone().unwrap_or_default();
        let payload_bytes = msg.payload.len();
        let attempt = msg.delivery_attempt;
        let redelivered = msg.is_redelivery();
        let started = Instant::now();
        let handled = self.inner.call(msg);

        Box::pin(async move {
            let result = handled.await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(Disposition::Retry(reason)) => warn!(
                    subject = %subject,
                    message_id = %message_id,
                    payload_bytes,
                    attempt,
                    redelivered,
                    duration_ms,
                    outcome = "retry",
                    reason = %reason,
                    "message handled"
                ),
                Ok(disposition) => info!(
                    subject = %subject,
                    message_id = %message_id,
                    payload_bytes,
                    attempt,
                    redelivered,
                    duration_ms,
                    outcome = disposition.label(),
                    "message handled"
                ),
                Err(e) => error!(
                    subject = %subject,
                    message_id = %message_id,
                    payload_bytes,
                    attempt,
                    redelivered,
                    duration_ms,
                    error = %e,
                    "message handler failed"
                ),
            }

            result
        })
    }
}
