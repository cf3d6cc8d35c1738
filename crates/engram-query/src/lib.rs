//! Engram Query - the `find` parameter surface, reciprocal-rank fusion
//! and result ranking. The executor lives in the engine crate, which
//! owns the indexes; everything here is pure and synchronous.

use engram_core::{Entity, EntityId, Filter, NounType, SortOrder, VerbType};
use engram_graph::Direction;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Rank-fusion constant from the RRF literature.
pub const RRF_K: f32 = 60.0;

/// Default result page size.
pub const DEFAULT_LIMIT: usize = 10;

/// How text-capable queries combine the vector and word-index signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchMode {
    /// Vector signal only.
    Semantic,
    /// Word index only.
    Text,
    #[default]
    Hybrid,
}

/// Graph constraint: restrict results to ids reachable from (or leading
/// to) the anchors within `depth` hops.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphConstraint {
    pub from: Vec<EntityId>,
    pub to: Vec<EntityId>,
    pub via: Option<VerbType>,
    pub depth: usize,
    pub direction: Option<Direction>,
}

impl Default for GraphConstraint {
    fn default() -> Self {
        Self { from: Vec::new(), to: Vec::new(), via: None, depth: 1, direction: None }
    }
}

impl GraphConstraint {
    pub fn from_id(id: EntityId) -> Self {
        Self { from: vec![id], ..Default::default() }
    }

    /// Anchor ids paired with the traversal direction to use from each.
    /// An explicit `direction` wins; otherwise `from` anchors walk
    /// outward and `to` anchors walk inward.
    pub fn anchors(&self) -> Vec<(EntityId, Direction)> {
        let mut anchors = Vec::with_capacity(self.from.len() + self.to.len());
        for id in &self.from {
            anchors.push((*id, self.direction.unwrap_or(Direction::Out)));
        }
        for id in &self.to {
            anchors.push((*id, self.direction.unwrap_or(Direction::In)));
        }
        anchors
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Parameters of the unified `find` call. Every signal is optional; the
/// planner enumerates whatever is present and fuses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindParams {
    /// Pre-computed query vector.
    pub vector: Option<Vec<f32>>,
    /// Text query; embedded externally for the vector stage, tokenized
    /// for the text stage.
    pub query: Option<String>,
    /// Entity type filter; empty means all types.
    #[serde(rename = "type")]
    pub noun_types: Vec<NounType>,
    #[serde(rename = "where")]
    pub filter: Option<Filter>,
    pub connected: Option<GraphConstraint>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: Option<OrderBy>,
    pub search_mode: SearchMode,
    /// RRF alpha override; defaults to the token-count schedule.
    pub alpha: Option<f32>,
    pub explain: bool,
    pub include_vectors: bool,
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

impl FindParams {
    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self { vector: Some(vector), ..Default::default() }
    }

    pub fn with_query(query: impl Into<String>) -> Self {
        Self { query: Some(query.into()), ..Default::default() }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

/// Per-result score explanation, reported when `explain` is set.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreExplain {
    pub vector_rank: Option<usize>,
    pub vector_distance: Option<f32>,
    pub vector_contribution: Option<f32>,
    pub text_rank: Option<usize>,
    pub text_score: Option<f32>,
    pub text_contribution: Option<f32>,
    /// Filter predicates the result passed.
    pub predicates: Vec<String>,
}

/// One ranked `find` result.
#[derive(Debug, Clone)]
pub struct FindResult {
    pub entity: Entity,
    pub score: f32,
    pub explain: Option<ScoreExplain>,
}

/// The alpha schedule: short queries lean on text overlap, long ones on
/// the embedding. Overridable per query.
pub fn alpha_for_token_count(tokens: usize) -> f32 {
    match tokens {
        0..=2 => 0.3,
        3..=4 => 0.5,
        _ => 0.7,
    }
}

/// One fused candidate with its per-signal provenance.
#[derive(Debug, Clone, Copy)]
pub struct FusedHit {
    pub id: EntityId,
    pub score: f32,
    pub vector_rank: Option<usize>,
    pub text_rank: Option<usize>,
}

/// Reciprocal Rank Fusion:
/// `alpha / (k + rank_vector) + (1 - alpha) / (k + rank_text)`, ranks
/// 1-based; a candidate absent from one list takes no contribution from
/// it. When one list is empty the ordering degenerates to the other
/// regardless of alpha.
pub fn rrf_fuse(
    vector_ranked: &[EntityId],
    text_ranked: &[EntityId],
    alpha: f32,
) -> Vec<FusedHit> {
    let mut hits: HashMap<EntityId, FusedHit> = HashMap::new();
    for (i, id) in vector_ranked.iter().enumerate() {
        let rank = i + 1;
        let entry = hits
            .entry(*id)
            .or_insert(FusedHit { id: *id, score: 0.0, vector_rank: None, text_rank: None });
        entry.vector_rank = Some(rank);
        entry.score += alpha / (RRF_K + rank as f32);
    }
    for (i, id) in text_ranked.iter().enumerate() {
        let rank = i + 1;
        let entry = hits
            .entry(*id)
            .or_insert(FusedHit { id: *id, score: 0.0, vector_rank: None, text_rank: None });
        entry.text_rank = Some(rank);
        entry.score += (1.0 - alpha) / (RRF_K + rank as f32);
    }
    let mut fused: Vec<FusedHit> = hits.into_values().collect();
    // Stable order: score descending, id-lexicographic tiebreak.
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    fused
}

/// Stable sort by a metadata field, missing values last, id tiebreak.
/// `indexed_metadata` exposes the reserved keys, so `createdAt` and
/// `noun` sort like any user field.
pub fn sort_by_field(results: &mut [FindResult], order_by: &OrderBy) {
    results.sort_by(|a, b| {
        let av = a.entity.indexed_metadata().get(&order_by.field).cloned();
        let bv = b.entity.indexed_metadata().get(&order_by.field).cloned();
        let ord = match (av, bv) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        let ord = match order_by.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        ord.then_with(|| a.entity.id.cmp(&b.entity.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<EntityId> {
        let mut v: Vec<EntityId> = (0..n).map(|_| EntityId::new()).collect();
        v.sort();
        v
    }

    #[test]
    fn alpha_schedule_brackets() {
        assert_eq!(alpha_for_token_count(1), 0.3);
        assert_eq!(alpha_for_token_count(2), 0.3);
        assert_eq!(alpha_for_token_count(3), 0.5);
        assert_eq!(alpha_for_token_count(4), 0.5);
        assert_eq!(alpha_for_token_count(5), 0.7);
        assert_eq!(alpha_for_token_count(12), 0.7);
    }

    #[test]
    fn rrf_prefers_agreement() {
        let v = ids(3);
        // v[0] ranks first on both signals, v[1] and v[2] split.
        let fused = rrf_fuse(&[v[0], v[1]], &[v[0], v[2]], 0.5);
        assert_eq!(fused[0].id, v[0]);
        assert_eq!(fused[0].vector_rank, Some(1));
        assert_eq!(fused[0].text_rank, Some(1));
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn rrf_degenerates_when_one_signal_is_empty() {
        let v = ids(4);
        let ranked = vec![v[2], v[0], v[3], v[1]];
        for alpha in [0.1, 0.3, 0.7, 0.9] {
            let fused = rrf_fuse(&ranked, &[], alpha);
            let order: Vec<EntityId> = fused.iter().map(|h| h.id).collect();
            assert_eq!(order, ranked, "alpha {alpha} changed a single-signal ordering");

            let fused = rrf_fuse(&[], &ranked, alpha);
            let order: Vec<EntityId> = fused.iter().map(|h| h.id).collect();
            assert_eq!(order, ranked);
        }
    }

    #[test]
    fn rrf_alpha_weights_the_signals() {
        let v = ids(2);
        // v[0] wins on vector, v[1] wins on text.
        let vector = vec![v[0], v[1]];
        let text = vec![v[1], v[0]];
        let vector_heavy = rrf_fuse(&vector, &text, 0.9);
        assert_eq!(vector_heavy[0].id, v[0]);
        let text_heavy = rrf_fuse(&vector, &text, 0.1);
        assert_eq!(text_heavy[0].id, v[1]);
    }

    #[test]
    fn ties_break_by_id() {
        let v = ids(2);
        let fused = rrf_fuse(&[v[0]], &[v[1]], 0.5);
        assert_eq!(fused[0].id, v[0].min(v[1]));
    }

    #[test]
    fn graph_constraint_anchor_directions() {
        let a = EntityId::new();
        let b = EntityId::new();
        let c = GraphConstraint { from: vec![a], to: vec![b], ..Default::default() };
        let anchors = c.anchors();
        assert_eq!(anchors, vec![(a, Direction::Out), (b, Direction::In)]);

        let forced = GraphConstraint {
            from: vec![a],
            to: vec![b],
            direction: Some(Direction::Both),
            ..Default::default()
        };
        assert!(forced.anchors().iter().all(|(_, d)| *d == Direction::Both));
    }

    #[test]
    fn find_params_parse_from_json() {
        let json = serde_json::json!({
            "query": "quick fox",
            "type": ["document"],
            "where": {"year": {"gte": 2022}},
            "connected": {"from": [uuid::Uuid::new_v4()], "depth": 2, "direction": "out"},
            "limit": 5,
            "searchMode": "hybrid",
            "orderBy": {"field": "year", "order": "desc"}
        });
        let params: FindParams = serde_json::from_value(json).unwrap();
        assert_eq!(params.query.as_deref(), Some("quick fox"));
        assert_eq!(params.noun_types, vec![NounType::Document]);
        assert!(params.filter.is_some());
        assert_eq!(params.connected.as_ref().unwrap().depth, 2);
        assert_eq!(params.effective_limit(), 5);
        assert_eq!(params.order_by.as_ref().unwrap().field, "year");
    }
}
