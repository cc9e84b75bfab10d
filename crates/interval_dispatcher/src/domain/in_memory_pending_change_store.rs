use crate::domain::{PendingChangeEntry, PendingChangeStore};
use async_trait::async_trait;
use common::domain::DomainResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// `PendingChangeStore` over a lock-guarded HashMap
pub struct InMemoryPendingChangeStore {
    changes: Arc<RwLock<HashMap<String, PendingChangeEntry>>>,
}

impl InMemoryPendingChangeStore {
    pub fn new() -> Self {
        Self {
            changes: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryPendingChangeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PendingChangeStore for InMemoryPendingChangeStore {
    async fn upsert(&self, device_id: String, entry: PendingChangeEntry) -> DomainResult<()> {
        self.changes.write().await.insert(device_id, entry);
        Ok(())
    }

    async fn get(&self, device_id: &str) -> DomainResult<Option<PendingChangeEntry>> {
        Ok(self.changes.read().await.get(device_id).copied())
    }

    async fn remove(&self, device_id: &str) -> DomainResult<Option<PendingChangeEntry>> {
        Ok(self.changes.write().await.remove(device_id))
    }

    async fn exists(&self, device_id: &str) -> DomainResult<bool> {
        Ok(self.changes.read().await.contains_key(device_id))
    }

    async fn count(&self) -> DomainResult<usize> {
        Ok(self.changes.read().await.len())
    }

    async fn clear(&self) -> DomainResult<()> {
        self.changes.write().await.clear();
        Ok(())
    }
}
