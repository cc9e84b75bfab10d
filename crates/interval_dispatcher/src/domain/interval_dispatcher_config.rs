use std::time::Duration;

pub const DEFAULT_PENDING_COLLECTION: &str = "pending-interval-updates";
pub const DEFAULT_APPLIED_COLLECTION: &str = "updated-intervals";
pub const DEFAULT_ADJUST_FUNCTION: &str = "adjustIntervals";

#[derive(Debug, Clone)]
pub struct IntervalDispatcherConfig {
    /// Change log collection watched for pending changes, keyed by device id
    pub pending_collection: String,
    /// Collection receiving the last applied change per device
    pub applied_collection: String,
    /// Device function that applies a change
    pub function_name: String,
    pub call_timeout: Duration,
    /// Pause before watching the change log again after the watch fails
    pub resubscribe_delay: Duration,
}

impl Default for IntervalDispatcherConfig {
    fn default() -> Self {
        Self {
            pending_collection: DEFAULT_PENDING_COLLECTION.to_string(),
            applied_collection: DEFAULT_APPLIED_COLLECTION.to_string(),
            function_name: DEFAULT_ADJUST_FUNCTION.to_string(),
            call_timeout: Duration::from_secs(30),
            resubscribe_delay: Duration::from_secs(5),
        }
    }
}
