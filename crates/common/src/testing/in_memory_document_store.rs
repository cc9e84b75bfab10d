use crate::domain::{
    AddDocumentRepoInput, ChangeLogWatcher, DeleteDocumentRepoInput, Document, DocumentChange,
    DocumentChangeBatch, DocumentChangeStream, DocumentRepository, DomainError, DomainResult,
    SetDocumentRepoInput,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

type WatchSender = mpsc::UnboundedSender<DomainResult<DocumentChangeBatch>>;

struct Stored {
    document: Document,
    revision: u64,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Stored>>,
    watchers: HashMap<String, Vec<WatchSender>>,
    last_revision: u64,
    failing_writes: bool,
}

impl State {
    /// Store a document under the next revision and announce it to watchers
    fn write(&mut self, collection: &str, document_id: String, document: Document) {
        self.last_revision += 1;
        let revision = self.last_revision;
        self.collections.entry(collection.to_string()).or_default().insert(
            document_id.clone(),
            Stored {
                document: document.clone(),
                revision,
            },
        );
        self.notify(
            collection,
            DocumentChange::Upserted {
                document_id,
                document,
                revision,
            },
        );
    }

    fn notify(&mut self, collection: &str, change: DocumentChange) {
        if let Some(senders) = self.watchers.get_mut(collection) {
            senders.retain(|tx| tx.unbounded_send(Ok(vec![change.clone()])).is_ok());
        }
    }

    fn check_writable(&self) -> DomainResult<()> {
        if self.failing_writes {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "document store unavailable"
            )))
        } else {
            Ok(())
        }
    }
}

/// Document store held in memory with the same watch contract as the KV
/// store: every watch first replays the collection, then streams changes
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<State>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, collection: &str, document_id: &str) -> Option<Document> {
        let state = self.state.lock().await;
        state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(document_id))
            .map(|stored| stored.document.clone())
    }

    pub async fn revision(&self, collection: &str, document_id: &str) -> Option<u64> {
        let state = self.state.lock().await;
        state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(document_id))
            .map(|stored| stored.revision)
    }

    pub async fn documents(&self, collection: &str) -> Vec<(String, Document)> {
        let state = self.state.lock().await;
        state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, stored)| (id.clone(), stored.document.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Make every subsequent write fail until reset
    pub async fn set_failing_writes(&self, failing: bool) {
        self.state.lock().await.failing_writes = failing;
    }

    /// Terminate every open watch of a collection with a subscription error
    pub async fn break_watches(&self, collection: &str) {
        let mut state = self.state.lock().await;
        if let Some(senders) = state.watchers.remove(collection) {
            for tx in senders {
                let _ = tx.unbounded_send(Err(DomainError::SubscriptionError(
                    "watch interrupted".to_string(),
                )));
            }
        }
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentStore {
    async fn add_document(&self, input: AddDocumentRepoInput) -> DomainResult<String> {
        let mut state = self.state.lock().await;
        state.check_writable()?;

        let document_id = xid::new().to_string();
        state.write(&input.collection, document_id.clone(), input.document);
        Ok(document_id)
    }

    async fn set_document(&self, input: SetDocumentRepoInput) -> DomainResult<()> {
        let mut state = self.state.lock().await;
        state.check_writable()?;

        let existing = state
            .collections
            .get(&input.collection)
            .and_then(|docs| docs.get(&input.document_id))
            .map(|stored| stored.document.clone());
        let document = match (input.merge, existing) {
            (true, Some(mut existing)) => {
                existing.extend(input.document);
                existing
            }
            _ => input.document,
        };
        state.write(&input.collection, input.document_id, document);
        Ok(())
    }

    async fn delete_document(&self, input: DeleteDocumentRepoInput) -> DomainResult<()> {
        let mut state = self.state.lock().await;
        state.check_writable()?;

        let Some(docs) = state.collections.get_mut(&input.collection) else {
            return Ok(());
        };
        let current = docs.get(&input.document_id).map(|stored| stored.revision);
        match (input.expected_revision, current) {
            (Some(expected), Some(current)) if current != expected => {
                return Err(DomainError::RevisionConflict(
                    format!("{}.{}", input.collection, input.document_id),
                    expected,
                ));
            }
            _ => {}
        }
        if docs.remove(&input.document_id).is_some() {
            state.notify(
                &input.collection,
                DocumentChange::Removed {
                    document_id: input.document_id,
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeLogWatcher for InMemoryDocumentStore {
    async fn watch(&self, collection: &str) -> DomainResult<DocumentChangeStream> {
        let mut state = self.state.lock().await;
        let (tx, rx) = mpsc::unbounded();

        let replay: DocumentChangeBatch = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, stored)| DocumentChange::Upserted {
                        document_id: id.clone(),
                        document: stored.document.clone(),
                        revision: stored.revision,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !replay.is_empty() {
            let _ = tx.unbounded_send(Ok(replay));
        }

        state
            .watchers
            .entry(collection.to_string())
            .or_default()
            .push(tx);
        Ok(rx.boxed())
    }
}
