mod device_control;
mod document;
mod envelope;
mod pending_change;
mod result;

pub use device_control::*;
pub use document::*;
pub use envelope::*;
pub use pending_change::*;
pub use result::*;
