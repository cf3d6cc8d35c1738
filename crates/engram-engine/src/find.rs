//! The unified query executor. Planning and ranking run synchronously
//! under a read lock on the in-memory indexes; entity materialisation
//! happens afterwards with no lock held, so storage latency never blocks
//! writers or other queries.

use crate::database::{Database, SimilarParams};
use crate::state::Indexes;
use crate::{EngramError, Result};
use engram_core::{DistanceMetric, EntityId, FieldOp, Filter, MetadataValue};
use engram_graph::DEFAULT_NODE_BUDGET;
use engram_index::tokenize;
use engram_query::{
    alpha_for_token_count, rrf_fuse, FindParams, FindResult, ScoreExplain, SearchMode,
    sort_by_field,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// How far past the requested page the pre-filter may be before we stop
/// restricting the ANN search to it.
const PREFILTER_FACTOR: usize = 10;

/// Re-query attempts when a filtered ANN pass comes back short.
const EF_RETRY_LIMIT: usize = 3;

struct Ranked {
    id: EntityId,
    score: f32,
    vector_rank: Option<usize>,
    vector_distance: Option<f32>,
    text_rank: Option<usize>,
    text_score: Option<f32>,
}

struct Plan {
    ranked: Vec<Ranked>,
    /// No scoring signal at all: order by creation time instead.
    unscored: bool,
}

pub(crate) async fn execute(db: &Database, params: FindParams) -> Result<Vec<FindResult>> {
    let scoped = match params.deadline {
        Some(deadline) => db.with_deadline(deadline),
        None => db.clone(),
    };
    let fut = execute_inner(&scoped, params);
    scoped.run_op("find", fut).await
}

async fn execute_inner(db: &Database, params: FindParams) -> Result<Vec<FindResult>> {
    let inner = db.inner();
    let limit = params.effective_limit();
    if limit == 0 {
        return Ok(Vec::new());
    }

    // Resolve the vector signal before touching any lock: embedding is
    // an external call.
    let mut query_vector = params.vector.clone();
    if let Some(v) = &query_vector {
        db.validate_vector(v)?;
    }
    if query_vector.is_none() && params.search_mode != SearchMode::Text {
        if let Some(text) = &params.query {
            match &inner.config.embedder {
                Some(embedder) => query_vector = Some(db.embed(embedder, text).await?),
                None if params.search_mode == SearchMode::Semantic => {
                    return Err(EngramError::validation(
                        "query",
                        "semantic search needs a query vector or a configured embedder",
                    ));
                }
                None => {
                    warn!("no embedder configured; hybrid search degrades to text-only");
                }
            }
        }
    }

    let plan = {
        let idx = inner.indexes.read();
        plan_and_rank(&idx, &params, query_vector.as_deref(), limit)?
    };

    materialize(db, plan, &params, limit).await
}

fn plan_and_rank(
    idx: &Indexes,
    params: &FindParams,
    query_vector: Option<&[f32]>,
    limit: usize,
) -> Result<Plan> {
    // 1. Filter set: type filter and metadata filter, intersected.
    let mut filter_parts: Vec<Filter> = Vec::new();
    if !params.noun_types.is_empty() {
        let tags: Vec<MetadataValue> = params
            .noun_types
            .iter()
            .map(|n| MetadataValue::String(n.as_str().to_string()))
            .collect();
        filter_parts.push(Filter::field("noun", FieldOp::OneOf(tags)));
    }
    if let Some(filter) = &params.filter {
        filter_parts.push(filter.clone());
    }
    let filter_set: Option<HashSet<EntityId>> = if filter_parts.is_empty() {
        None
    } else {
        Some(idx.metadata.query(&Filter::AllOf(filter_parts)))
    };

    // 2. Graph constraint: ids reachable per its parameters.
    let graph_set: Option<HashSet<EntityId>> = params.connected.as_ref().map(|constraint| {
        let depth = constraint.depth.max(1);
        let mut reachable: HashSet<EntityId> = HashSet::new();
        for (anchor, direction) in constraint.anchors() {
            reachable.extend(idx.graph.reachable(
                &anchor,
                depth,
                direction,
                constraint.via,
                DEFAULT_NODE_BUDGET,
            ));
        }
        reachable
    });

    let pre_set: Option<HashSet<EntityId>> = match (filter_set, graph_set) {
        (Some(f), Some(g)) => Some(f.intersection(&g).copied().collect()),
        (Some(f), None) => Some(f),
        (None, Some(g)) => Some(g),
        (None, None) => None,
    };
    if let Some(set) = &pre_set {
        if set.is_empty() {
            return Ok(Plan { ranked: Vec::new(), unscored: false });
        }
    }

    let has_vector = query_vector.is_some() && params.search_mode != SearchMode::Text;
    let has_text = params.query.is_some() && params.search_mode != SearchMode::Semantic;
    let need = params.offset + limit;

    // 3. Vector stage.
    let mut vector_hits: Vec<(EntityId, f32)> = Vec::new();
    if let (true, Some(q)) = (has_vector, query_vector) {
        let ef_base = idx.hnsw.params().ef_search.max(limit * 4);
        match &pre_set {
            // A small pre-filter restricts candidates: post-filter the
            // k-NN hits and re-query with larger ef while short.
            Some(set) if set.len() <= PREFILTER_FACTOR * limit => {
                let mut ef = ef_base;
                for attempt in 0.. {
                    let hits = idx.hnsw.search(q, ef, ef);
                    vector_hits = hits
                        .iter()
                        .filter(|h| set.contains(&h.id))
                        .map(|h| (h.id, h.distance))
                        .collect();
                    let exhausted = hits.len() < ef || ef >= idx.hnsw.len().max(1);
                    if vector_hits.len() >= need || exhausted || attempt + 1 >= EF_RETRY_LIMIT {
                        break;
                    }
                    ef *= 2;
                    debug!(ef, found = vector_hits.len(), "re-querying ANN with larger ef");
                }
            }
            _ => {
                let hits = idx.hnsw.search(q, need.max(limit), ef_base);
                vector_hits = hits
                    .into_iter()
                    .filter(|h| pre_set.as_ref().map_or(true, |s| s.contains(&h.id)))
                    .map(|h| (h.id, h.distance))
                    .collect();
            }
        }
    }

    // 4. Text stage: word-index candidates scored by term overlap.
    let mut text_hits: Vec<(EntityId, f32)> = Vec::new();
    if has_text {
        if let Some(text) = &params.query {
            text_hits = idx
                .metadata
                .text_search(text)
                .into_iter()
                .filter(|(id, _)| pre_set.as_ref().map_or(true, |s| s.contains(id)))
                .collect();
        }
    }

    // 5. Metadata-only path: no scoring signal, candidates come from
    // the filter/graph sets (or everything).
    if vector_hits.is_empty() && text_hits.is_empty() && !has_vector && !has_text {
        let candidates: Vec<EntityId> = match pre_set {
            Some(set) => set.into_iter().collect(),
            None => idx.metadata.query(&Filter::AllOf(Vec::new())).into_iter().collect(),
        };
        let ranked = candidates
            .into_iter()
            .map(|id| Ranked {
                id,
                score: 0.0,
                vector_rank: None,
                vector_distance: None,
                text_rank: None,
                text_score: None,
            })
            .collect();
        return Ok(Plan { ranked, unscored: true });
    }

    // 6. Fusion. Single-signal queries degenerate to that signal's
    // ranking regardless of alpha.
    let alpha = params.alpha.unwrap_or_else(|| {
        alpha_for_token_count(params.query.as_deref().map(|q| tokenize(q).len()).unwrap_or(0))
    });
    let vector_ids: Vec<EntityId> = vector_hits.iter().map(|(id, _)| *id).collect();
    let text_ids: Vec<EntityId> = text_hits.iter().map(|(id, _)| *id).collect();
    let fused = rrf_fuse(&vector_ids, &text_ids, alpha);

    let distance_by_id: HashMap<EntityId, f32> = vector_hits.into_iter().collect();
    let text_score_by_id: HashMap<EntityId, f32> = text_hits.into_iter().collect();
    let ranked = fused
        .into_iter()
        .map(|hit| Ranked {
            id: hit.id,
            score: hit.score,
            vector_rank: hit.vector_rank,
            vector_distance: distance_by_id.get(&hit.id).copied(),
            text_rank: hit.text_rank,
            text_score: text_score_by_id.get(&hit.id).copied(),
        })
        .collect();
    Ok(Plan { ranked, unscored: false })
}

async fn materialize(
    db: &Database,
    plan: Plan,
    params: &FindParams,
    limit: usize,
) -> Result<Vec<FindResult>> {
    let need_all = params.order_by.is_some() || plan.unscored;
    let candidates: Vec<&Ranked> = if need_all {
        plan.ranked.iter().collect()
    } else {
        plan.ranked.iter().take(params.offset + limit).collect()
    };
    let ids: Vec<EntityId> = candidates.iter().map(|r| r.id).collect();
    let entities = db.batch_get(&ids, params.include_vectors).await?;

    let predicates = params.filter.as_ref().map(|f| {
        let mut out = Vec::new();
        f.describe(&mut out);
        out
    });

    let mut results: Vec<FindResult> = Vec::with_capacity(candidates.len());
    for ranked in candidates {
        // Dangling candidates (deleted or unresolvable) drop out here.
        let Some(entity) = entities.get(&ranked.id) else { continue };
        let explain = params.explain.then(|| ScoreExplain {
            vector_rank: ranked.vector_rank,
            vector_distance: ranked.vector_distance,
            vector_contribution: ranked
                .vector_rank
                .map(|r| 1.0 / (engram_query::RRF_K + r as f32)),
            text_rank: ranked.text_rank,
            text_score: ranked.text_score,
            text_contribution: ranked.text_rank.map(|r| 1.0 / (engram_query::RRF_K + r as f32)),
            predicates: predicates.clone().unwrap_or_default(),
        });
        results.push(FindResult { entity: entity.clone(), score: ranked.score, explain });
    }

    if let Some(order_by) = &params.order_by {
        sort_by_field(&mut results, order_by);
    } else if plan.unscored {
        // Stable default for unscored results: creation time, id tiebreak.
        results.sort_by(|a, b| {
            a.entity
                .created_at
                .cmp(&b.entity.created_at)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
    }

    Ok(results.into_iter().skip(params.offset).take(limit).collect())
}

pub(crate) async fn similar(db: &Database, params: SimilarParams) -> Result<Vec<FindResult>> {
    let inner = db.inner();
    let limit = params.limit.unwrap_or(engram_query::DEFAULT_LIMIT);

    let vector = {
        let idx = inner.indexes.read();
        idx.hnsw.vector_of(&params.to).map(<[f32]>::to_vec)
    };
    let vector = match vector {
        Some(v) => v,
        None => {
            let Some(entity) = db.get(&params.to, true).await? else {
                return Err(EngramError::NotFound(format!("entity {}", params.to)));
            };
            entity.vector.ok_or_else(|| {
                EngramError::validation("to", format!("entity {} has no vector", params.to))
            })?
        }
    };

    // Over-fetch by one so dropping the anchor still fills the page,
    // and always request explanations for the threshold check.
    let find_params = FindParams {
        vector: Some(vector),
        noun_types: params.noun_types.clone(),
        filter: params.filter.clone(),
        limit: Some(limit + 1),
        search_mode: SearchMode::Semantic,
        explain: true,
        ..Default::default()
    };
    let metric = inner.config.metric;
    let results = execute(db, find_params).await?;
    let filtered = results
        .into_iter()
        .filter(|r| r.entity.id != params.to)
        .filter(|r| match (params.threshold, r.explain.as_ref()) {
            (Some(threshold), Some(explain)) => match (explain.vector_distance, metric) {
                (Some(d), DistanceMetric::Cosine) => 1.0 - d >= threshold,
                (Some(d), DistanceMetric::InnerProduct) => -d >= threshold,
                _ => true,
            },
            _ => true,
        })
        .map(|mut r| {
            r.explain = None;
            r
        })
        .take(limit)
        .collect();
    Ok(filtered)
}
