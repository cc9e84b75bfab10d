use crate::domain::PendingChangeIndexService;
use common::domain::ChangeLogWatcher;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Feeds the pending change index from a live watch of the change log.
///
/// Every (re)subscription starts from an empty cache because the watch
/// replays the whole collection first. A broken or ended watch is retried
/// after `resubscribe_delay` until the token is cancelled.
pub struct ChangeLogSubscriber {
    watcher: Arc<dyn ChangeLogWatcher>,
    index: Arc<PendingChangeIndexService>,
    resubscribe_delay: Duration,
}

impl ChangeLogSubscriber {
    pub fn new(
        watcher: Arc<dyn ChangeLogWatcher>,
        index: Arc<PendingChangeIndexService>,
        resubscribe_delay: Duration,
    ) -> Self {
        Self {
            watcher,
            index,
            resubscribe_delay,
        }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let collection = self.index.pending_collection().to_string();
        info!(collection = %collection, "starting change log subscription");

        while !ctx.is_cancelled() {
            self.subscribe_once(&collection, &ctx).await;

            if ctx.is_cancelled() {
                break;
            }

            warn!(
                collection = %collection,
                delay_ms = self.resubscribe_delay.as_millis() as u64,
                "change log subscription lost, resubscribing"
            );
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }

        info!(collection = %collection, "change log subscription stopped");
        Ok(())
    }

    /// Consume one watch until it breaks, ends or the token is cancelled
    async fn subscribe_once(&self, collection: &str, ctx: &CancellationToken) {
        let mut stream = match self.watcher.watch(collection).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(collection = %collection, error = %e, "failed to watch change log");
                return;
            }
        };

        if let Err(e) = self.index.reset().await {
            error!(error = %e, "failed to reset pending change cache");
            return;
        }

        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(batch)) => self.index.apply_batch(batch).await,
                Some(Err(e)) => {
                    error!(collection = %collection, error = %e, "change log watch failed");
                    return;
                }
                None => {
                    debug!(collection = %collection, "change log watch ended");
                    return;
                }
            }
        }
    }
}
