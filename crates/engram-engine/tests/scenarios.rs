//! The six end-to-end scenarios from the design conversations: insert/
//! search/delete, range filters, depth-2 traversal, rollback, branch
//! divergence with historical reads, and hybrid rank fusion.

mod common;

use common::{flat_vector, open_db, open_db_with_embedder, FlakyAdapter};
use engram_engine::{
    CommitOptions, Database, EngramConfig, EntityDraft, FindParams, GraphConstraint,
    MetadataValue, NounType, RelateOptions, RelationshipDraft, SimilarParams, UpdateRequest,
    VerbType,
};
use engram_engine::{Direction, EngramError};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn axis_vector(dim: usize, phase: usize) -> Vec<f32> {
    (0..dim).map(|i| if i % 2 == phase { 1.0 } else { 0.0 }).collect()
}

fn filter(v: serde_json::Value) -> engram_engine::Filter {
    engram_engine::Filter::parse(&v).unwrap()
}

#[tokio::test]
async fn s1_insert_search_delete() {
    let db = open_db(384).await;
    let id1 = db
        .add(
            NounType::Document,
            EntityDraft::with_vector(axis_vector(384, 0))
                .metadata([("year".to_string(), MetadataValue::Int(2024))].into()),
        )
        .await
        .unwrap();
    let id2 = db
        .add(
            NounType::Document,
            EntityDraft::with_vector(axis_vector(384, 1))
                .metadata([("year".to_string(), MetadataValue::Int(2023))].into()),
        )
        .await
        .unwrap();

    let hits = db
        .find(FindParams::with_vector(axis_vector(384, 0)).limit(1))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity.id, id1);

    db.delete(&id1).await.unwrap();

    let hits = db
        .find(FindParams::with_vector(axis_vector(384, 0)).limit(1))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity.id, id2);
}

#[tokio::test]
async fn s2_range_and_type_filter() {
    let db = open_db(8).await;
    let mut ids = Vec::new();
    for year in [2020, 2022, 2024] {
        let id = db
            .add(
                NounType::Document,
                EntityDraft::with_vector(flat_vector(8, 0.5))
                    .metadata([("year".to_string(), MetadataValue::Int(year))].into()),
            )
            .await
            .unwrap();
        ids.push(id);
    }
    // A decoy of another type in range.
    db.add(
        NounType::Person,
        EntityDraft::with_vector(flat_vector(8, 0.5))
            .metadata([("year".to_string(), MetadataValue::Int(2023))].into()),
    )
    .await
    .unwrap();

    let params = FindParams {
        noun_types: vec![NounType::Document],
        filter: Some(filter(json!({"year": {"gte": 2022}}))),
        ..Default::default()
    };
    let results = db.find(params).await.unwrap();
    let found: HashSet<_> = results.iter().map(|r| r.entity.id).collect();
    assert_eq!(found, HashSet::from([ids[1], ids[2]]));
}

#[tokio::test]
async fn s3_graph_traversal_depth_two() {
    let db = open_db(8).await;
    let p1 = db.add(NounType::Person, EntityDraft::default()).await.unwrap();
    let org = db.add(NounType::Organization, EntityDraft::default()).await.unwrap();
    let proj = db.add(NounType::Project, EntityDraft::default()).await.unwrap();

    db.relate(RelationshipDraft::new(p1, org, VerbType::WorksFor), RelateOptions::default())
        .await
        .unwrap();
    db.relate(RelationshipDraft::new(org, proj, VerbType::Owns), RelateOptions::default())
        .await
        .unwrap();

    let params = FindParams {
        connected: Some(GraphConstraint {
            from: vec![p1],
            depth: 2,
            direction: Some(Direction::Out),
            ..Default::default()
        }),
        ..Default::default()
    };
    let results = db.find(params).await.unwrap();
    let found: HashSet<_> = results.iter().map(|r| r.entity.id).collect();
    assert_eq!(found, HashSet::from([org, proj]));

    // Depth 1 only reaches the org.
    let params = FindParams {
        connected: Some(GraphConstraint::from_id(p1)),
        ..Default::default()
    };
    let results = db.find(params).await.unwrap();
    let found: HashSet<_> = results.iter().map(|r| r.entity.id).collect();
    assert_eq!(found, HashSet::from([org]));
}

#[tokio::test]
async fn s4_transaction_rollback_on_vector_write_failure() {
    let adapter = FlakyAdapter::new();
    let storage: Arc<dyn engram_storage::StorageAdapter> = adapter.clone();
    let db = Database::open(storage, EngramConfig::default().with_dimension(8))
        .await
        .unwrap();

    let id = db
        .add(
            NounType::Document,
            EntityDraft::with_vector(flat_vector(8, 0.25))
                .metadata([("label".to_string(), "v1".into())].into()),
        )
        .await
        .unwrap();

    let before = adapter.dump().await;
    let neighbors_before = db
        .find(FindParams::with_vector(flat_vector(8, 0.25)).limit(5))
        .await
        .unwrap()
        .len();

    // Arrange: the vector blob write fails on the update attempt.
    adapter.arm("vector.bin");
    let err = db
        .update(&id, UpdateRequest::new().vector(flat_vector(8, 0.9)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngramError::Storage(_)), "unexpected error {err}");
    adapter.disarm();

    // Storage is byte-identical to the pre-transaction state.
    let after = adapter.dump().await;
    assert_eq!(before, after);

    // Entity reads show the old vector and metadata.
    let entity = db.get(&id, true).await.unwrap().unwrap();
    assert_eq!(entity.vector.as_deref(), Some(&flat_vector(8, 0.25)[..]));
    assert_eq!(entity.metadata.get("label"), Some(&"v1".into()));

    // The vector index still answers like before.
    let neighbors_after = db
        .find(FindParams::with_vector(flat_vector(8, 0.25)).limit(5))
        .await
        .unwrap()
        .len();
    assert_eq!(neighbors_before, neighbors_after);
}

#[tokio::test]
async fn s5_fork_diverge_and_as_of() {
    let db = open_db(8).await;
    let id = db
        .add(
            NounType::Note,
            EntityDraft::with_vector(flat_vector(8, 0.5))
                .metadata([("label".to_string(), "v1".into())].into()),
        )
        .await
        .unwrap();
    let c0 = db.commit(CommitOptions::message("base")).await.unwrap();

    db.fork("exp").await.unwrap();
    db.checkout("exp").await.unwrap();
    db.update(
        &id,
        UpdateRequest::new().metadata([("label".to_string(), "v2".into())].into()),
    )
    .await
    .unwrap();
    db.commit(CommitOptions::message("exp1")).await.unwrap();

    db.checkout("main").await.unwrap();
    let main_view = db.get(&id, false).await.unwrap().unwrap();
    assert_eq!(main_view.metadata.get("label"), Some(&"v1".into()));

    db.checkout("exp").await.unwrap();
    let exp_view = db.get(&id, false).await.unwrap().unwrap();
    assert_eq!(exp_view.metadata.get("label"), Some(&"v2".into()));

    let historical = db.as_of(c0.id).await.unwrap();
    let at_c0 = historical.get(&id, false).await.unwrap().unwrap();
    assert_eq!(at_c0.metadata.get("label"), Some(&"v1".into()));
}

#[tokio::test]
async fn s6_hybrid_search_rrf() {
    let db = open_db_with_embedder(64).await;
    let quick_brown = db
        .add(NounType::Document, EntityDraft::with_data("quick brown fox"))
        .await
        .unwrap();
    let quick_runs = db
        .add(NounType::Document, EntityDraft::with_data("quick fox runs"))
        .await
        .unwrap();
    let turtle = db
        .add(NounType::Document, EntityDraft::with_data("slow turtle"))
        .await
        .unwrap();

    let results = db
        .find(FindParams::with_query("quick fox").limit(3))
        .await
        .unwrap();
    assert!(!results.is_empty());
    let quick_ids = HashSet::from([quick_brown, quick_runs]);
    assert!(
        quick_ids.contains(&results[0].entity.id),
        "top hit should be a quick+fox document"
    );
    // The turtle either trails the quick documents or misses entirely.
    for (i, result) in results.iter().enumerate() {
        if result.entity.id == turtle {
            assert_eq!(i, results.len() - 1, "turtle outranked a quick document");
        }
    }
    let positions: Vec<_> = results.iter().map(|r| r.entity.id).collect();
    assert!(positions.contains(&quick_brown) && positions.contains(&quick_runs));
}

#[tokio::test]
async fn similar_finds_nearest_to_anchor() {
    let db = open_db(16).await;
    let a = db
        .add(NounType::Document, EntityDraft::with_vector(axis_vector(16, 0)))
        .await
        .unwrap();
    let b = db
        .add(NounType::Document, EntityDraft::with_vector(axis_vector(16, 0)))
        .await
        .unwrap();
    let far = db
        .add(NounType::Document, EntityDraft::with_vector(axis_vector(16, 1)))
        .await
        .unwrap();

    let results = db.similar(SimilarParams::to(a)).await.unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.entity.id).collect();
    assert!(!ids.contains(&a), "anchor must be excluded");
    assert_eq!(ids[0], b);

    // A strict threshold drops the orthogonal vector.
    let results = db
        .similar(SimilarParams { threshold: Some(0.9), ..SimilarParams::to(a) })
        .await
        .unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.entity.id).collect();
    assert_eq!(ids, vec![b]);
    assert!(!ids.contains(&far));
}
