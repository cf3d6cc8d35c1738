//! Transaction atomicity beyond the headline rollback scenario: failures
//! at different operation positions always restore the exact prior
//! state, storage bytes and in-memory indexes alike.

mod common;

use common::{flat_vector, FlakyAdapter};
use engram_engine::{
    Database, EngramConfig, EngramError, EntityDraft, FindParams, GraphConstraint, NounType,
    RelateOptions, RelationQuery, RelationshipDraft, VerbType,
};
use std::sync::Arc;

async fn open_flaky(dim: usize) -> (Arc<FlakyAdapter>, Database) {
    let adapter = FlakyAdapter::new();
    let storage: Arc<dyn engram_storage::StorageAdapter> = adapter.clone();
    let db = Database::open(storage, EngramConfig::default().with_dimension(dim)).await.unwrap();
    (adapter, db)
}

#[tokio::test]
async fn failed_add_leaves_no_trace() {
    let (adapter, db) = open_flaky(8).await;
    let before = adapter.dump().await;

    adapter.arm("metadata.json");
    let err = db
        .add(NounType::Note, EntityDraft::with_vector(flat_vector(8, 0.4)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngramError::Storage(_)));
    adapter.disarm();

    assert_eq!(before, adapter.dump().await);
    let hits = db.find(FindParams::with_vector(flat_vector(8, 0.4))).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn failed_vector_write_mid_add_rolls_back_metadata() {
    let (adapter, db) = open_flaky(8).await;
    let before = adapter.dump().await;

    // The metadata blob write succeeds, the vector blob write fails: the
    // metadata write must be undone too.
    adapter.arm("vector.bin");
    let err = db
        .add(NounType::Note, EntityDraft::with_vector(flat_vector(8, 0.4)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngramError::Storage(_)));
    adapter.disarm();

    assert_eq!(before, adapter.dump().await);
}

#[tokio::test]
async fn failed_relate_restores_graph_and_relations() {
    let (adapter, db) = open_flaky(8).await;
    let a = db.add(NounType::Person, EntityDraft::default()).await.unwrap();
    let b = db.add(NounType::Person, EntityDraft::default()).await.unwrap();
    let before = adapter.dump().await;

    adapter.arm("entities/verbs/");
    let err = db
        .relate(RelationshipDraft::new(a, b, VerbType::Knows), RelateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngramError::Storage(_)));
    adapter.disarm();

    assert_eq!(before, adapter.dump().await);
    let rels = db.get_relations(&RelationQuery { from: Some(a), ..Default::default() }).await.unwrap();
    assert!(rels.is_empty());
    let connected = db
        .find(FindParams { connected: Some(GraphConstraint::from_id(a)), ..Default::default() })
        .await
        .unwrap();
    assert!(connected.is_empty());
}

#[tokio::test]
async fn failed_delete_keeps_entity_and_edges() {
    let (adapter, db) = open_flaky(8).await;
    let a = db
        .add(NounType::Person, EntityDraft::with_vector(flat_vector(8, 0.2)))
        .await
        .unwrap();
    let b = db.add(NounType::Person, EntityDraft::default()).await.unwrap();
    db.relate(RelationshipDraft::new(a, b, VerbType::Knows), RelateOptions::default())
        .await
        .unwrap();
    let before = adapter.dump().await;

    // The relationship tombstone write fails midway through the delete
    // cascade (the entity tombstone has already been written).
    adapter.arm("entities/verbs/");
    let err = db.delete(&a).await.unwrap_err();
    assert!(matches!(err, EngramError::Storage(_)));
    adapter.disarm();

    assert_eq!(before, adapter.dump().await);
    assert!(db.get(&a, false).await.unwrap().is_some());
    let rels = db.get_relations(&RelationQuery { from: Some(a), ..Default::default() }).await.unwrap();
    assert_eq!(rels.len(), 1);
    let hits = db.find(FindParams::with_vector(flat_vector(8, 0.2)).limit(1)).await.unwrap();
    assert_eq!(hits[0].entity.id, a);
}

#[tokio::test]
async fn successful_transactions_survive_a_reopen() {
    let (adapter, db) = open_flaky(8).await;
    let a = db
        .add(NounType::Document, EntityDraft::with_vector(flat_vector(8, 0.7)))
        .await
        .unwrap();
    db.shutdown().await.unwrap();

    let storage: Arc<dyn engram_storage::StorageAdapter> = adapter;
    let db = Database::open(storage, EngramConfig::default().with_dimension(8)).await.unwrap();
    let entity = db.get(&a, true).await.unwrap().unwrap();
    assert_eq!(entity.vector.as_deref(), Some(&flat_vector(8, 0.7)[..]));
}
