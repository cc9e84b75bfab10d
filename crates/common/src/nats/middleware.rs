mod message_logging;
mod message_tracing;

pub use message_logging::*;
pub use message_tracing::*;
