//! Bulk write operations. Items are processed in chunks (default 100);
//! each item succeeds or fails on its own, and the report carries both
//! sides so a partial-failure caller can retry exactly what it needs to.

use crate::database::{Database, RelateOptions, UpdateRequest};
use crate::{EngramError, Result};
use engram_core::{EntityDraft, EntityId, NounType, RelationshipDraft, RelationshipId};
use tracing::instrument;

/// One `add_many` item.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub noun: NounType,
    pub draft: EntityDraft,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Keep processing after per-item failures (default). When false,
    /// the first failure aborts the remaining items and surfaces as the
    /// call's error; already-applied items stay applied.
    pub continue_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { continue_on_error: true }
    }
}

/// Per-item outcome report.
#[derive(Debug, Default)]
pub struct BatchReport<T> {
    pub successful: Vec<(usize, T)>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: EngramError,
}

impl<T> BatchReport<T> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

async fn run_batch<I, T, F, Fut>(
    db: &Database,
    items: Vec<I>,
    options: BatchOptions,
    op: F,
) -> Result<BatchReport<T>>
where
    F: Fn(Database, I) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let chunk_size = db.inner().config.batch_size.max(1);
    let mut report = BatchReport { successful: Vec::new(), failed: Vec::new() };
    let mut items: Vec<(usize, I)> = items.into_iter().enumerate().collect();
    while !items.is_empty() {
        let rest = items.split_off(chunk_size.min(items.len()));
        let chunk = items;
        items = rest;
        let futures: Vec<_> = chunk
            .into_iter()
            .map(|(index, item)| {
                let db = db.clone();
                let fut = op(db, item);
                async move { (index, fut.await) }
            })
            .collect();
        for (index, outcome) in futures::future::join_all(futures).await {
            match outcome {
                Ok(value) => report.successful.push((index, value)),
                Err(error) => report.failed.push(BatchFailure { index, error }),
            }
        }
        if !options.continue_on_error && !report.failed.is_empty() {
            break;
        }
    }
    report.successful.sort_by_key(|(index, _)| *index);
    report.failed.sort_by_key(|f| f.index);
    if !options.continue_on_error {
        if let Some(first) = report.failed.first() {
            return Err(EngramError::conflict(format!(
                "batch aborted at item {}: {}",
                first.index, first.error
            )));
        }
    }
    Ok(report)
}

impl Database {
    /// Bulk insert. Chunks of `batch_size`, per-item status, callers
    /// retry the failed slice.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn add_many(
        &self,
        items: Vec<AddRequest>,
        options: BatchOptions,
    ) -> Result<BatchReport<EntityId>> {
        run_batch(self, items, options, |db, item: AddRequest| async move {
            db.add(item.noun, item.draft).await
        })
        .await
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn update_many(
        &self,
        items: Vec<(EntityId, UpdateRequest)>,
        options: BatchOptions,
    ) -> Result<BatchReport<()>> {
        run_batch(self, items, options, |db, (id, request)| async move {
            db.update(&id, request).await
        })
        .await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn delete_many(
        &self,
        ids: Vec<EntityId>,
        options: BatchOptions,
    ) -> Result<BatchReport<()>> {
        run_batch(self, ids, options, |db, id: EntityId| async move { db.delete(&id).await })
            .await
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn relate_many(
        &self,
        items: Vec<RelationshipDraft>,
        options: BatchOptions,
    ) -> Result<BatchReport<RelationshipId>> {
        run_batch(self, items, options, |db, draft: RelationshipDraft| async move {
            db.relate(draft, RelateOptions::default()).await
        })
        .await
    }
}
