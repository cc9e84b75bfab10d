use crate::nats::trace_context::adopt_remote_parent;
use crate::nats::{Disposition, QueueMessage};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{Instrument, info_span};

/// Opens a `process` span around each handled message, joined to the
/// publisher's trace when the message carries W3C trace headers
#[derive(Clone, Debug)]
pub struct MessageTracingLayer {
    operation: &'static str,
}

impl MessageTracingLayer {
    pub fn new(operation: &'static str) -> Self {
        Self { operation }
    }
}

impl<S> Layer<S> for MessageTracingLayer {
    type Service = MessageTracing<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MessageTracing {
            inner,
            operation: self.operation,
        }
    }
}

#[derive(Clone)]
pub struct MessageTracing<S> {
    inner: S,
    operation: &'static str,
}

impl<S> Service<QueueMessage> for MessageTracing<S>
where
    S: Service<QueueMessage, Response = Disposition>,
    S::Future: Send + 'static,
{
    type Response = Disposition;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Disposition, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, msg: QueueMessage) -> Self::Future {
        let span = info_span!(
            "queue_message",
            otel.name = self.operation,
            otel.kind = "consumer",
            messaging.system = "nats",
            messaging.operation = "process",
            messaging.destination.name = %msg.subject,
            messaging.message.id = msg.message_id.as_deref().unwrap_or_default(),
            messaging.delivery_attempt = msg.delivery_attempt,
        );
        if let Some(headers) = &msg.headers {
            adopt_remote_parent(&span, headers);
        }

        let handled = span.in_scope(|| self.inner.call(msg));
        Box::pin(handled.instrument(span))
    }
}
