#![cfg(feature = "integration-tests")]

use common::domain::{
    AddDocumentRepoInput, ChangeLogWatcher, DeleteDocumentRepoInput, Document, DocumentChange,
    DocumentChangeStream, DocumentRepository, DomainError, SetDocumentRepoInput,
};
use common::nats::{NatsClient, NatsKvDocumentStore};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use testcontainers::core::WaitFor;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

struct TestEnvironment {
    _nats_container: ContainerAsync<GenericImage>,
    store: NatsKvDocumentStore,
}

async fn setup_test_env() -> TestEnvironment {
    let nats_container = GenericImage::new("nats", "latest")
        .with_exposed_port(4222.into())
        .with_wait_for(WaitFor::message_on_stderr("Server is ready"))
        .with_cmd(["-js"])
        .start()
        .await
        .unwrap();

    let host = nats_container.get_host().await.unwrap();
    let port = nats_container.get_host_port_ipv4(4222).await.unwrap();
    let client = NatsClient::connect(
        &format!("nats://{}:{}", host, port),
        Duration::from_secs(10),
    )
    .await
    .unwrap();
    let bucket = client.ensure_key_value_bucket("documents").await.unwrap();

    TestEnvironment {
        _nats_container: nats_container,
        store: NatsKvDocumentStore::new(bucket),
    }
}

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

async fn next_batch(stream: &mut DocumentChangeStream) -> Vec<DocumentChange> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for changes")
        .expect("watch ended")
        .expect("watch failed")
}

#[tokio::test]
async fn test_merge_preserves_existing_fields() {
    let env = setup_test_env().await;

    env.store
        .set_document(SetDocumentRepoInput {
            collection: "device-status".to_string(),
            document_id: "dev1".to_string(),
            document: doc(json!({ "Timestamp": "2024-01-01T00:00:00Z", "online": true })),
            merge: true,
        })
        .await
        .unwrap();
    env.store
        .set_document(SetDocumentRepoInput {
            collection: "device-status".to_string(),
            document_id: "dev1".to_string(),
            document: doc(json!({ "Timestamp": "2024-01-01T00:05:00Z", "data": "rebooting" })),
            merge: true,
        })
        .await
        .unwrap();

    let mut watch = env.store.watch("device-status").await.unwrap();
    let batch = next_batch(&mut watch).await;
    assert_eq!(batch.len(), 1);
    let DocumentChange::Upserted {
        document_id,
        document,
        revision,
    } = &batch[0]
    else {
        panic!("expected upsert, got {:?}", batch[0]);
    };
    assert_eq!(document_id, "dev1");
    assert_eq!(
        document,
        &doc(json!({
            "Timestamp": "2024-01-01T00:05:00Z",
            "online": true,
            "data": "rebooting"
        }))
    );
    assert_eq!(*revision, 2);
}

#[tokio::test]
async fn test_watch_replays_current_state_then_streams_changes() {
    let env = setup_test_env().await;

    env.store
        .set_document(SetDocumentRepoInput {
            collection: "pending-interval-updates".to_string(),
            document_id: "dev1".to_string(),
            document: doc(json!({ "a": 120000 })),
            merge: false,
        })
        .await
        .unwrap();
    // Other collections in the same bucket are not delivered
    env.store
        .add_document(AddDocumentRepoInput {
            collection: "dev1".to_string(),
            document: doc(json!({ "Timestamp": "2024-01-01T00:00:00Z" })),
        })
        .await
        .unwrap();

    let mut watch = env.store.watch("pending-interval-updates").await.unwrap();
    let replay = next_batch(&mut watch).await;
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].document_id(), "dev1");

    env.store
        .delete_document(DeleteDocumentRepoInput {
            collection: "pending-interval-updates".to_string(),
            document_id: "dev1".to_string(),
            expected_revision: None,
        })
        .await
        .unwrap();

    let live = next_batch(&mut watch).await;
    assert_eq!(
        live,
        vec![DocumentChange::Removed {
            document_id: "dev1".to_string()
        }]
    );
}

#[tokio::test]
async fn test_guarded_delete_keeps_document_written_after_read() {
    let env = setup_test_env().await;
    let pending = |a: u64| SetDocumentRepoInput {
        collection: "pending-interval-updates".to_string(),
        document_id: "dev1".to_string(),
        document: doc(json!({ "a": a })),
        merge: false,
    };
    let delete = |expected_revision| DeleteDocumentRepoInput {
        collection: "pending-interval-updates".to_string(),
        document_id: "dev1".to_string(),
        expected_revision,
    };

    env.store.set_document(pending(120000)).await.unwrap();
    let mut watch = env.store.watch("pending-interval-updates").await.unwrap();
    let seen = match &next_batch(&mut watch).await[0] {
        DocumentChange::Upserted { revision, .. } => *revision,
        other => panic!("expected upsert, got {:?}", other),
    };

    env.store.set_document(pending(240000)).await.unwrap();
    let newer = match &next_batch(&mut watch).await[0] {
        DocumentChange::Upserted { revision, .. } => *revision,
        other => panic!("expected upsert, got {:?}", other),
    };

    let result = env.store.delete_document(delete(Some(seen))).await;
    assert!(matches!(result, Err(DomainError::RevisionConflict(_, r)) if r == seen));

    env.store.delete_document(delete(Some(newer))).await.unwrap();
    assert_eq!(
        next_batch(&mut watch).await,
        vec![DocumentChange::Removed {
            document_id: "dev1".to_string()
        }]
    );

    // Deleting again is a no-op
    env.store.delete_document(delete(Some(newer))).await.unwrap();
}

#[tokio::test]
async fn test_add_generates_distinct_ids() {
    let env = setup_test_env().await;

    let first = env
        .store
        .add_document(AddDocumentRepoInput {
            collection: "dev1".to_string(),
            document: doc(json!({ "Temperature (*C)": 21.5 })),
        })
        .await
        .unwrap();
    let second = env
        .store
        .add_document(AddDocumentRepoInput {
            collection: "dev1".to_string(),
            document: doc(json!({ "Temperature (*C)": 21.7 })),
        })
        .await
        .unwrap();

    assert_ne!(first, second);
}
