pub mod domain;
pub mod interval_dispatcher;

pub use interval_dispatcher::*;
