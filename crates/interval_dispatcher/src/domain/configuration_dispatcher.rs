use crate::domain::{IntervalDispatcherConfig, PendingChangeEntry, PendingChangeIndexService};
use async_trait::async_trait;
use chrono::Utc;
use common::domain::{
    CallFunctionInput, DeleteDocumentRepoInput, DeviceController, DeviceReachabilityListener,
    DocumentRepository, DomainError, DomainResult, SetDocumentRepoInput,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NoPendingChange,
    Applied { return_value: Option<i64> },
}

/// Delivers a device's pending change when the device comes online.
///
/// The change is only cleared from the change log once the device accepted
/// it and the applied record is written, and only while the log still holds
/// the revision that was applied. The cache entry goes away when the log
/// removal comes back through the subscription. Failures leave everything in
/// place for the next online signal.
pub struct ConfigurationDispatcher {
    index: Arc<PendingChangeIndexService>,
    device_controller: Arc<dyn DeviceController>,
    document_repository: Arc<dyn DocumentRepository>,
    config: IntervalDispatcherConfig,
}

impl ConfigurationDispatcher {
    pub fn new(
        index: Arc<PendingChangeIndexService>,
        device_controller: Arc<dyn DeviceController>,
        document_repository: Arc<dyn DocumentRepository>,
        config: IntervalDispatcherConfig,
    ) -> Self {
        Self {
            index,
            device_controller,
            document_repository,
            config,
        }
    }

    pub async fn has_pending(&self, device_id: &str) -> DomainResult<bool> {
        self.index.has(device_id).await
    }

    pub async fn pending_change(
        &self,
        device_id: &str,
    ) -> DomainResult<Option<PendingChangeEntry>> {
        self.index.get(device_id).await
    }

    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn dispatch(&self, device_id: &str) -> DomainResult<DispatchOutcome> {
        let Some(PendingChangeEntry { change, revision }) = self.index.get(device_id).await? else {
            debug!("no pending interval change");
            return Ok(DispatchOutcome::NoPendingChange);
        };

        let argument = change.to_argument();
        info!(
            function = %self.config.function_name,
            argument = %argument,
            revision,
            "applying pending interval change"
        );

        let call = self.device_controller.call_function(CallFunctionInput {
            device_id: device_id.to_string(),
            function_name: self.config.function_name.clone(),
            argument,
        });

        let output = tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| DomainError::DeviceControlTimeout {
                device_id: device_id.to_string(),
                timeout_ms: self.config.call_timeout.as_millis(),
            })??;

        info!(return_value = ?output.return_value, "device accepted interval change");

        self.document_repository
            .set_document(SetDocumentRepoInput {
                collection: self.config.applied_collection.clone(),
                document_id: device_id.to_string(),
                document: change.to_applied_document(Utc::now()),
                merge: false,
            })
            .await?;

        let cleared = self
            .document_repository
            .delete_document(DeleteDocumentRepoInput {
                collection: self.index.pending_collection().to_string(),
                document_id: device_id.to_string(),
                expected_revision: Some(revision),
            })
            .await;
        match cleared {
            // Written while the call was in flight; it waits for the next signal
            Err(DomainError::RevisionConflict(..)) => {
                warn!("pending change was replaced while being applied, keeping the newer one")
            }
            other => other?,
        }

        Ok(DispatchOutcome::Applied {
            return_value: output.return_value,
        })
    }
}

#[async_trait]
impl DeviceReachabilityListener for ConfigurationDispatcher {
    async fn on_device_reachable(&self, device_id: &str) {
        match self.dispatch(device_id).await {
            Ok(DispatchOutcome::Applied { .. }) => {
                info!(device_id = %device_id, "pending interval change applied")
            }
            Ok(DispatchOutcome::NoPendingChange) => {}
            Err(e) => {
                error!(
                    device_id = %device_id,
                    error = %e,
                    "failed to apply pending interval change, retrying on next online signal"
                )
            }
        }
    }
}
