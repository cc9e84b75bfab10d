use crate::domain::{
    AddDocumentRepoInput, ChangeLogWatcher, DeleteDocumentRepoInput, Document, DocumentChange,
    DocumentChangeBatch, DocumentChangeStream, DocumentRepository, DomainError, DomainResult,
    SetDocumentRepoInput,
};
use anyhow::Context;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, instrument, warn};

/// Maximum number of ready watch entries delivered as one batch
const WATCH_BATCH_SIZE: usize = 64;

/// Document store on a JetStream key-value bucket.
///
/// A collection is a key prefix: document `id` of collection `c` is stored
/// under key `c.id` as a JSON object.
pub struct NatsKvDocumentStore {
    store: kv::Store,
}

impl NatsKvDocumentStore {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }
}

/// Build the bucket key for a document, rejecting names that are not a
/// single KV token
pub fn document_key(collection: &str, document_id: &str) -> DomainResult<String> {
    validate_token("collection", collection)?;
    validate_token("document id", document_id)?;
    Ok(format!("{}.{}", collection, document_id))
}

fn validate_token(kind: &str, token: &str) -> DomainResult<()> {
    let valid = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '/'));
    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidDocumentKey(format!(
            "{} {:?} must be a non-empty run of [A-Za-z0-9_-=/]",
            kind, token
        )))
    }
}

fn encode_document(document: Document) -> DomainResult<Bytes> {
    let bytes = serde_json::to_vec(&serde_json::Value::Object(document))
        .context("failed to serialize document")?;
    Ok(Bytes::from(bytes))
}

fn decode_document(key: &str, value: &[u8]) -> DomainResult<Document> {
    match serde_json::from_slice::<serde_json::Value>(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(DomainError::InvalidDocument(key.to_string())),
        Err(e) => Err(DomainError::InvalidDocument(format!("{}: {}", key, e))),
    }
}

#[async_trait]
impl DocumentRepository for NatsKvDocumentStore {
    #[instrument(skip(self, input), fields(collection = %input.collection))]
    async fn add_document(&self, input: AddDocumentRepoInput) -> DomainResult<String> {
        let document_id = xid::new().to_string();
        let key = document_key(&input.collection, &document_id)?;

        self.store
            .put(&key, encode_document(input.document)?)
            .await
            .context("failed to add document")?;

        debug!(key = %key, "added document");
        Ok(document_id)
    }

    #[instrument(
        skip(self, input),
        fields(
            collection = %input.collection,
            document_id = %input.document_id,
            merge = input.merge
        )
    )]
    async fn set_document(&self, input: SetDocumentRepoInput) -> DomainResult<()> {
        let key = document_key(&input.collection, &input.document_id)?;

        if input.merge {
            let existing = self
                .store
                .entry(&key)
                .await
                .context("failed to read document for merge")?;

            if let Some(entry) = existing.filter(|e| matches!(e.operation, kv::Operation::Put)) {
                let mut merged = match decode_document(&key, &entry.value) {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(key = %key, error = %e, "replacing undecodable document on merge");
                        Document::new()
                    }
                };
                merged.extend(input.document);

                // Revision guard: fails if another writer touched the key since the read
                self.store
                    .update(&key, encode_document(merged)?, entry.revision)
                    .await
                    .context("failed to merge document")?;

                debug!(key = %key, "merged document");
                return Ok(());
            }
        }

        self.store
            .put(&key, encode_document(input.document)?)
            .await
            .context("failed to set document")?;

        debug!(key = %key, "set document");
        Ok(())
    }

    #[instrument(
        skip(self, input),
        fields(collection = %input.collection, document_id = %input.document_id)
    )]
    async fn delete_document(&self, input: DeleteDocumentRepoInput) -> DomainResult<()> {
        let key = document_key(&input.collection, &input.document_id)?;

        let Some(revision) = input.expected_revision else {
            self.store
                .delete(&key)
                .await
                .context("failed to delete document")?;
            debug!(key = %key, "deleted document");
            return Ok(());
        };

        if let Err(e) = self.store.delete_expect_revision(&key, Some(revision)).await {
            // The server only reports a failed precondition; the current entry
            // tells whether the document was rewritten or is already gone
            let current = self
                .store
                .entry(&key)
                .await
                .context("failed to read document after guarded delete")?;
            return match current {
                Some(entry)
                    if matches!(entry.operation, kv::Operation::Put)
                        && entry.revision != revision =>
                {
                    debug!(
                        key = %key,
                        revision,
                        current = entry.revision,
                        "kept rewritten document"
                    );
                    Err(DomainError::RevisionConflict(key, revision))
                }
                Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                    Err(anyhow::anyhow!("failed to delete document: {}", e).into())
                }
                _ => Ok(()),
            };
        }

        debug!(key = %key, revision, "deleted document");
        Ok(())
    }
}

#[async_trait]
impl ChangeLogWatcher for NatsKvDocumentStore {
    async fn watch(&self, collection: &str) -> DomainResult<DocumentChangeStream> {
        validate_token("collection", collection)?;
        let prefix = format!("{}.", collection);

        // History replay first delivers the current value of every key
        let watch = self
            .store
            .watch_with_history(format!("{}>", prefix))
            .await
            .map_err(|e| {
                DomainError::SubscriptionError(format!("failed to watch {}: {}", collection, e))
            })?;

        debug!(collection = %collection, "watching collection");

        let stream = watch
            .map(move |entry| entry_to_change(&prefix, entry))
            .ready_chunks(WATCH_BATCH_SIZE)
            .filter_map(|items| async move { collect_batch(items) })
            .boxed();

        Ok(stream)
    }
}

fn entry_to_change(
    prefix: &str,
    entry: Result<kv::Entry, kv::WatcherError>,
) -> DomainResult<Option<DocumentChange>> {
    let entry = entry.map_err(|e| DomainError::SubscriptionError(e.to_string()))?;

    let Some(document_id) = entry.key.strip_prefix(prefix) else {
        return Ok(None);
    };
    let document_id = document_id.to_string();

    match entry.operation {
        kv::Operation::Put => {
            // Documents are always JSON objects; anything else is surfaced as an
            // empty document so downstream validation rejects it
            let document = decode_document(&entry.key, &entry.value).unwrap_or_else(|e| {
                warn!(key = %entry.key, error = %e, "undecodable document in change log");
                Document::new()
            });
            Ok(Some(DocumentChange::Upserted {
                document_id,
                document,
                revision: entry.revision,
            }))
        }
        kv::Operation::Delete | kv::Operation::Purge => {
            Ok(Some(DocumentChange::Removed { document_id }))
        }
    }
}

/// Fold ready watch entries into one batch. An error fails the whole batch;
/// subscribers resubscribe and replay history, so nothing is lost.
fn collect_batch(
    items: Vec<DomainResult<Option<DocumentChange>>>,
) -> Option<DomainResult<DocumentChangeBatch>> {
    let mut batch = DocumentChangeBatch::with_capacity(items.len());
    for item in items {
        match item {
            Ok(Some(change)) => batch.push(change),
            Ok(None) => {}
            Err(e) => return Some(Err(e)),
        }
    }
    if batch.is_empty() { None } else { Some(Ok(batch)) }
}
