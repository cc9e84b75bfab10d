mod client;
mod kv_document_store;
mod message;
mod middleware;
mod queue;
mod service_consumer;
mod trace_context;

pub use client::*;
pub use kv_document_store::*;
pub use message::*;
pub use middleware::*;
pub use queue::*;
pub use service_consumer::*;
pub use trace_context::*;
