use crate::domain::result::DomainResult;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A schemaless document as stored in a collection. Field order is preserved.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Repository input for inserting a document under a generated id
#[derive(Debug, Clone, PartialEq)]
pub struct AddDocumentRepoInput {
    pub collection: String,
    pub document: Document,
}

/// Repository input for writing a document under a known id
#[derive(Debug, Clone, PartialEq)]
pub struct SetDocumentRepoInput {
    pub collection: String,
    pub document_id: String,
    pub document: Document,
    /// Merge top-level fields into an existing document instead of replacing it
    pub merge: bool,
}

/// Repository input for deleting a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteDocumentRepoInput {
    pub collection: String,
    pub document_id: String,
    /// Only delete while the document is still at this revision
    pub expected_revision: Option<u64>,
}

/// Repository trait for document persistence operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a document with a generated id, returning the id
    async fn add_document(&self, input: AddDocumentRepoInput) -> DomainResult<String>;

    /// Create, replace or merge a document under the given id
    async fn set_document(&self, input: SetDocumentRepoInput) -> DomainResult<()>;

    /// Delete a document. Deleting a missing document is not an error.
    ///
    /// With `expected_revision` set, a document rewritten since that revision
    /// is kept and `DomainError::RevisionConflict` is returned.
    async fn delete_document(&self, input: DeleteDocumentRepoInput) -> DomainResult<()>;
}

/// A single change observed on a watched collection
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    /// Document was added or modified. `revision` increases with every write
    /// to the store.
    Upserted {
        document_id: String,
        document: Document,
        revision: u64,
    },
    /// Document was deleted
    Removed { document_id: String },
}

impl DocumentChange {
    pub fn document_id(&self) -> &str {
        match self {
            DocumentChange::Upserted { document_id, .. } => document_id,
            DocumentChange::Removed { document_id } => document_id,
        }
    }
}

/// Ordered batch of changes delivered by a watch
pub type DocumentChangeBatch = Vec<DocumentChange>;

/// Stream of change batches; an `Err` item means the watch is broken and
/// the caller should resubscribe
pub type DocumentChangeStream = BoxStream<'static, DomainResult<DocumentChangeBatch>>;

/// Live subscription to the changes of a collection.
///
/// Implementations must first replay the current contents of the collection
/// as `Upserted` changes, then deliver live changes in commit order.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChangeLogWatcher: Send + Sync {
    async fn watch(&self, collection: &str) -> DomainResult<DocumentChangeStream>;
}
