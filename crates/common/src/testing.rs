//! In-process collaborators for flow tests in downstream crates.

mod in_memory_document_store;

pub use in_memory_document_store::*;
