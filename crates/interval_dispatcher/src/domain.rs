mod change_log_subscriber;
mod configuration_dispatcher;
mod in_memory_pending_change_store;
mod interval_dispatcher_config;
mod pending_change_index_service;
mod pending_change_store;

pub use change_log_subscriber::*;
pub use configuration_dispatcher::*;
pub use in_memory_pending_change_store::*;
pub use interval_dispatcher_config::*;
pub use pending_change_index_service::*;
pub use pending_change_store::*;
