use async_trait::async_trait;
use common::domain::{DomainResult, PendingIntervalChange};

/// A validated change together with the change log revision it was read at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChangeEntry {
    pub change: PendingIntervalChange,
    pub revision: u64,
}

/// Cache of validated pending changes, at most one per device.
///
/// The durable change log is the source of truth; implementations only need
/// to hold what the log subscription has admitted.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PendingChangeStore: Send + Sync {
    /// Insert or replace the change for a device
    async fn upsert(&self, device_id: String, entry: PendingChangeEntry) -> DomainResult<()>;

    async fn get(&self, device_id: &str) -> DomainResult<Option<PendingChangeEntry>>;

    /// Remove and return the change for a device, if cached
    async fn remove(&self, device_id: &str) -> DomainResult<Option<PendingChangeEntry>>;

    async fn exists(&self, device_id: &str) -> DomainResult<bool>;

    async fn count(&self) -> DomainResult<usize>;

    /// Drop every cached change
    async fn clear(&self) -> DomainResult<()>;
}
