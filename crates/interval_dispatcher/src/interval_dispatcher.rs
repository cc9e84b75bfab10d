use crate::domain::{
    ChangeLogSubscriber, ConfigurationDispatcher, InMemoryPendingChangeStore,
    IntervalDispatcherConfig, PendingChangeIndexService,
};
use common::domain::{
    ChangeLogWatcher, DeviceController, DeviceReachabilityListener, DocumentRepository,
};
use relay_runner::AppProcess;
use std::sync::Arc;
use tracing::info;

/// Store-to-device half of the relay.
///
/// Owns the pending change cache. The ingest side reaches it only through
/// [`IntervalDispatcher::reachability_listener`].
pub struct IntervalDispatcher {
    subscriber: ChangeLogSubscriber,
    dispatcher: Arc<ConfigurationDispatcher>,
}

impl IntervalDispatcher {
    pub fn new(
        watcher: Arc<dyn ChangeLogWatcher>,
        document_repository: Arc<dyn DocumentRepository>,
        device_controller: Arc<dyn DeviceController>,
        config: IntervalDispatcherConfig,
    ) -> Self {
        info!(
            pending_collection = %config.pending_collection,
            applied_collection = %config.applied_collection,
            function = %config.function_name,
            call_timeout_ms = config.call_timeout.as_millis() as u64,
            "initializing interval dispatcher"
        );

        let store = Arc::new(InMemoryPendingChangeStore::new());
        let index = Arc::new(PendingChangeIndexService::new(
            store,
            Arc::clone(&document_repository),
            config.pending_collection.clone(),
        ));

        let subscriber =
            ChangeLogSubscriber::new(watcher, Arc::clone(&index), config.resubscribe_delay);

        let dispatcher = Arc::new(ConfigurationDispatcher::new(
            index,
            device_controller,
            document_repository,
            config,
        ));

        Self {
            subscriber,
            dispatcher,
        }
    }

    pub fn reachability_listener(&self) -> Arc<dyn DeviceReachabilityListener> {
        Arc::clone(&self.dispatcher) as Arc<dyn DeviceReachabilityListener>
    }

    pub fn dispatcher(&self) -> Arc<ConfigurationDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn into_runner_process(self) -> AppProcess {
        Box::new({
            let subscriber = self.subscriber;
            move |ctx| Box::pin(async move { subscriber.run(ctx).await })
        })
    }
}
