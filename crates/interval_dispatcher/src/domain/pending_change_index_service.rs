use crate::domain::{PendingChangeEntry, PendingChangeStore};
use common::domain::{
    DeleteDocumentRepoInput, Document, DocumentChange, DocumentRepository, DomainError,
    DomainResult, PendingIntervalChange,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Keeps the pending change cache in step with the durable change log.
///
/// Only the change log subscription writes through this service. Documents
/// that fail validation are deleted from the log instead of being cached.
pub struct PendingChangeIndexService {
    store: Arc<dyn PendingChangeStore>,
    document_repository: Arc<dyn DocumentRepository>,
    pending_collection: String,
}

impl PendingChangeIndexService {
    pub fn new(
        store: Arc<dyn PendingChangeStore>,
        document_repository: Arc<dyn DocumentRepository>,
        pending_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            document_repository,
            pending_collection: pending_collection.into(),
        }
    }

    /// Apply one delivered batch in order. Failures are logged per change and
    /// never stop the rest of the batch.
    pub async fn apply_batch(&self, batch: Vec<DocumentChange>) {
        debug!(changes = batch.len(), "applying change log batch");

        for change in batch {
            let result = match change {
                DocumentChange::Upserted {
                    document_id,
                    document,
                    revision,
                } => {
                    self.handle_change_upserted(&document_id, &document, revision)
                        .await
                }
                DocumentChange::Removed { document_id } => {
                    self.handle_change_removed(&document_id).await
                }
            };

            if let Err(e) = result {
                error!(error = %e, "failed to apply change log entry");
            }
        }
    }

    /// A change log document was added or modified at `revision`
    #[instrument(skip(self, document), fields(device_id = %device_id))]
    pub async fn handle_change_upserted(
        &self,
        device_id: &str,
        document: &Document,
        revision: u64,
    ) -> DomainResult<()> {
        match PendingIntervalChange::from_document(document) {
            Ok(change) => {
                self.store
                    .upsert(device_id.to_string(), PendingChangeEntry { change, revision })
                    .await?;
                info!(argument = %change.to_argument(), "pending interval change cached");
                Ok(())
            }
            Err(DomainError::ValidationError(reason)) => {
                warn!(
                    reason = %reason,
                    "rejecting invalid pending change, deleting it from the change log"
                );

                // An older valid change no longer matches the log
                self.store.remove(device_id).await?;

                let deleted = self
                    .document_repository
                    .delete_document(DeleteDocumentRepoInput {
                        collection: self.pending_collection.clone(),
                        document_id: device_id.to_string(),
                        expected_revision: Some(revision),
                    })
                    .await;
                match deleted {
                    // The rewrite is delivered next and judged on its own
                    Err(DomainError::RevisionConflict(..)) => {
                        debug!("invalid change already rewritten");
                        Ok(())
                    }
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }

    /// A change log document was deleted. Removing an uncached device is a no-op.
    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn handle_change_removed(&self, device_id: &str) -> DomainResult<()> {
        match self.store.remove(device_id).await? {
            Some(_) => info!("pending interval change evicted"),
            None => debug!("removed change was not cached"),
        }
        Ok(())
    }

    /// Drop the whole cache ahead of a full replay of the change log
    #[instrument(skip(self))]
    pub async fn reset(&self) -> DomainResult<()> {
        let evicted = self.store.count().await?;
        self.store.clear().await?;
        debug!(evicted, "pending change cache cleared");
        Ok(())
    }

    pub async fn has(&self, device_id: &str) -> DomainResult<bool> {
        self.store.exists(device_id).await
    }

    pub async fn get(&self, device_id: &str) -> DomainResult<Option<PendingChangeEntry>> {
        self.store.get(device_id).await
    }

    pub fn pending_collection(&self) -> &str {
        &self.pending_collection
    }
}
