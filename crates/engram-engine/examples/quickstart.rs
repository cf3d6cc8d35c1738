//! Minimal end-to-end tour: add entities, relate them, run a fused
//! query, branch and merge.
//!
//! ```sh
//! cargo run --example quickstart -p engram-engine
//! ```

use engram_engine::{
    CommitOptions, Database, EngramConfig, EntityDraft, FindParams, GraphConstraint,
    MergeStrategy, MetadataValue, NounType, RelateOptions, RelationshipDraft, VerbType,
};
use engram_storage::MemoryAdapter;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngramConfig::default().with_dimension(8);
    let db = Database::open(Arc::new(MemoryAdapter::new()), config).await?;

    let alice = db
        .add(
            NounType::Person,
            EntityDraft::with_vector(vec![0.9, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
                .metadata([("name".to_string(), MetadataValue::String("Alice".into()))].into()),
        )
        .await?;
    let acme = db
        .add(
            NounType::Organization,
            EntityDraft::with_vector(vec![0.1, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
                .metadata([("founded".to_string(), MetadataValue::Int(2019))].into()),
        )
        .await?;
    db.relate(RelationshipDraft::new(alice, acme, VerbType::WorksFor), RelateOptions::default())
        .await?;

    // Vector search restricted to entities one hop out from Alice.
    let results = db
        .find(FindParams {
            vector: Some(vec![0.2, 0.8, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            connected: Some(GraphConstraint::from_id(alice)),
            ..Default::default()
        })
        .await?;
    for result in &results {
        println!("{} ({:?}) score {:.4}", result.entity.id, result.entity.noun, result.score);
    }

    // Branch, change, merge back.
    db.commit(CommitOptions::message("seed data")).await?;
    db.fork("experiment").await?;
    db.checkout("experiment").await?;
    db.update(
        &acme,
        engram_engine::UpdateRequest::new()
            .metadata([("founded".to_string(), MetadataValue::Int(2020))].into()),
    )
    .await?;
    db.commit(CommitOptions::message("fix founding year")).await?;
    db.checkout("main").await?;
    let report = db.merge("experiment", "main", MergeStrategy::LastWriteWins).await?;
    println!("merged {} path(s) back into main", report.applied.len());

    let merged = db.get(&acme, false).await?.expect("acme survives the merge");
    println!("founded: {:?}", merged.metadata.get("founded"));

    db.shutdown().await?;
    Ok(())
}
