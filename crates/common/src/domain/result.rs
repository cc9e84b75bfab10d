use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Payload parse error: {0}")]
    PayloadParseError(String),

    #[error("Envelope decode error: {0}")]
    EnvelopeDecodeError(String),

    #[error("Unknown reading field index {index} (schema v{schema_version} has {field_count} fields)")]
    UnknownFieldIndex {
        index: usize,
        schema_version: u32,
        field_count: usize,
    },

    #[error("Invalid reading schema: {0}")]
    InvalidReadingSchema(String),

    #[error("Invalid document key: {0}")]
    InvalidDocumentKey(String),

    #[error("Document is not a JSON object: {0}")]
    InvalidDocument(String),

    #[error("Device control call failed for device {device_id}: {message}")]
    DeviceControlError { device_id: String, message: String },

    #[error("Device control call timed out for device {device_id} after {timeout_ms}ms")]
    DeviceControlTimeout { device_id: String, timeout_ms: u128 },

    #[error("Device cloud authentication failed: {0}")]
    AuthError(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Document {0} changed since revision {1}")]
    RevisionConflict(String, u64),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
