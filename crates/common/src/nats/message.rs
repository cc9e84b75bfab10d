use async_nats::HeaderMap;
use bytes::Bytes;

/// One delivered queue message, owned so it can travel through Tower layers
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub subject: String,
    /// Publisher-assigned message id, or the stream sequence when none was set
    pub message_id: Option<String>,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_attempt: u64,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl QueueMessage {
    pub fn new(subject: impl Into<String>, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject: subject.into(),
            message_id: None,
            delivery_attempt: 1,
            payload,
            headers,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_delivery_attempt(mut self, attempt: u64) -> Self {
        self.delivery_attempt = attempt;
        self
    }

    /// Value of a header, if present and non-empty
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(|value| value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_attempt > 1
    }
}

/// What the consumer does with a message once its handler returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handled; acknowledge it
    Ack,
    /// Can never be handled; acknowledge it so it is not redelivered
    Drop(String),
    /// Failed for now; reject it so the queue redelivers it later
    Retry(String),
}

impl Disposition {
    pub fn drop(reason: impl Into<String>) -> Self {
        Self::Drop(reason.into())
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry(reason.into())
    }

    /// Whether the message leaves the queue
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Self::Retry(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Drop(_) => "drop",
            Self::Retry(_) => "retry",
        }
    }
}
