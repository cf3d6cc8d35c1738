//! Branch behaviour through the public API: isolation, tombstone
//! inheritance, merge strategies, and index state across checkouts.

mod common;

use common::{flat_vector, open_db};
use engram_engine::{
    CommitOptions, EngramError, EntityDraft, FindParams, MergeStrategy, MetadataValue, NounType,
    UpdateRequest,
};
use serde_json::json;

fn filter(v: serde_json::Value) -> engram_engine::Filter {
    engram_engine::Filter::parse(&v).unwrap()
}

#[tokio::test]
async fn tombstone_inheritance_hides_parent_entity() {
    let db = open_db(8).await;
    let id = db
        .add(
            NounType::Document,
            EntityDraft::with_vector(flat_vector(8, 0.5))
                .metadata([("year".to_string(), MetadataValue::Int(2024))].into()),
        )
        .await
        .unwrap();
    db.commit(CommitOptions::message("base")).await.unwrap();

    db.fork("child").await.unwrap();
    db.checkout("child").await.unwrap();
    assert!(db.get(&id, false).await.unwrap().is_some(), "child inherits parent entity");

    db.delete(&id).await.unwrap();

    // Deleted in the child: invisible to get and find, though the parent
    // still has it.
    assert!(db.get(&id, false).await.unwrap().is_none());
    let by_filter = db
        .find(FindParams { filter: Some(filter(json!({"year": 2024}))), ..Default::default() })
        .await
        .unwrap();
    assert!(by_filter.is_empty());
    let by_vector = db.find(FindParams::with_vector(flat_vector(8, 0.5))).await.unwrap();
    assert!(by_vector.is_empty());

    db.checkout("main").await.unwrap();
    assert!(db.get(&id, false).await.unwrap().is_some());
    let by_vector = db.find(FindParams::with_vector(flat_vector(8, 0.5))).await.unwrap();
    assert_eq!(by_vector.len(), 1);
}

#[tokio::test]
async fn checkout_swaps_index_state() {
    let db = open_db(8).await;
    db.add(
        NounType::Note,
        EntityDraft::default().metadata([("branch".to_string(), "main".into())].into()),
    )
    .await
    .unwrap();
    db.commit(CommitOptions::message("base")).await.unwrap();

    db.fork("feature").await.unwrap();
    db.checkout("feature").await.unwrap();
    db.add(
        NounType::Note,
        EntityDraft::default().metadata([("branch".to_string(), "feature".into())].into()),
    )
    .await
    .unwrap();

    let on_feature = db
        .find(FindParams {
            filter: Some(filter(json!({"branch": {"exists": true}}))),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(on_feature.len(), 2, "feature sees inherited plus its own");

    db.checkout("main").await.unwrap();
    let on_main = db
        .find(FindParams {
            filter: Some(filter(json!({"branch": {"exists": true}}))),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(on_main.len(), 1, "main never sees the fork's entity");
}

#[tokio::test]
async fn merge_last_write_wins_through_engine() {
    let db = open_db(8).await;
    let id = db
        .add(
            NounType::Note,
            EntityDraft::default().metadata([("label".to_string(), "base".into())].into()),
        )
        .await
        .unwrap();
    db.commit(CommitOptions::message("base")).await.unwrap();
    db.fork("exp").await.unwrap();

    db.checkout("exp").await.unwrap();
    db.update(&id, UpdateRequest::new().metadata([("label".to_string(), "exp".into())].into()))
        .await
        .unwrap();
    db.commit(CommitOptions::message("exp change")).await.unwrap();

    db.checkout("main").await.unwrap();
    let report = db.merge("exp", "main", MergeStrategy::LastWriteWins).await.unwrap();
    assert!(!report.applied.is_empty());

    // Merge lands and the rebuilt indexes reflect it.
    let entity = db.get(&id, false).await.unwrap().unwrap();
    assert_eq!(entity.metadata.get("label"), Some(&"exp".into()));
    let hits = db
        .find(FindParams { filter: Some(filter(json!({"label": "exp"}))), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn manual_merge_conflicts_surface_paths() {
    let db = open_db(8).await;
    let id = db
        .add(
            NounType::Note,
            EntityDraft::default().metadata([("label".to_string(), "base".into())].into()),
        )
        .await
        .unwrap();
    db.commit(CommitOptions::message("base")).await.unwrap();
    db.fork("exp").await.unwrap();

    // Both sides touch the same entity.
    db.update(&id, UpdateRequest::new().metadata([("label".to_string(), "main2".into())].into()))
        .await
        .unwrap();
    db.commit(CommitOptions::message("main change")).await.unwrap();

    db.checkout("exp").await.unwrap();
    db.update(&id, UpdateRequest::new().metadata([("label".to_string(), "exp2".into())].into()))
        .await
        .unwrap();
    db.commit(CommitOptions::message("exp change")).await.unwrap();

    db.checkout("main").await.unwrap();
    let err = db.merge("exp", "main", MergeStrategy::Manual).await.unwrap_err();
    match err {
        EngramError::Conflict { conflicting, .. } => {
            assert!(!conflicting.is_empty());
            assert!(conflicting.iter().any(|p| p.contains(&id.to_string())));
        }
        other => panic!("expected conflict, got {other}"),
    }
    // Manual conflicts leave dst untouched.
    let entity = db.get(&id, false).await.unwrap().unwrap();
    assert_eq!(entity.metadata.get("label"), Some(&"main2".into()));
}

#[tokio::test]
async fn as_of_unknown_commit_is_not_found() {
    let db = open_db(8).await;
    let err = db.as_of(engram_engine::CommitId::new()).await.unwrap_err();
    assert!(matches!(err, EngramError::NotFound(_)));
}

#[tokio::test]
async fn list_branches_and_fork_bookkeeping() {
    let db = open_db(8).await;
    db.add(NounType::Note, EntityDraft::default()).await.unwrap();
    db.commit(CommitOptions::message("base")).await.unwrap();
    db.fork("a").await.unwrap();
    db.fork("b").await.unwrap();
    let branches = db.list_branches().await.unwrap();
    let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "main"]);
    for branch in &branches {
        if branch.name != "main" {
            assert_eq!(branch.parent.as_deref(), Some("main"));
            assert!(branch.tip.is_some(), "forks start at the parent tip");
        }
    }
    assert_eq!(db.current_branch(), "main");
}
