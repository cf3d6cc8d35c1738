//! In-memory derived state: the three indexes plus the relationship
//! table, swapped wholesale on checkout and rebuilt from storage.

use engram_core::{EntityId, Relationship, RelationshipId, VerbType};
use engram_graph::GraphIndex;
use engram_index::MetadataIndex;
use engram_vector::{HnswIndex, HnswParams};
use std::collections::{BTreeSet, HashMap};

/// Materialised relationship records with source/target lookups. Kept in
/// memory alongside the graph index so `get_relations` never touches
/// storage.
#[derive(Debug, Default)]
pub struct RelationshipTable {
    by_id: HashMap<RelationshipId, Relationship>,
    by_source: HashMap<EntityId, BTreeSet<RelationshipId>>,
    by_target: HashMap<EntityId, BTreeSet<RelationshipId>>,
}

/// Filter for `get_relations`.
#[derive(Debug, Clone, Default)]
pub struct RelationQuery {
    pub from: Option<EntityId>,
    pub to: Option<EntityId>,
    pub verb: Option<VerbType>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RelationshipTable {
    pub fn insert(&mut self, rel: Relationship) {
        self.by_source.entry(rel.from).or_default().insert(rel.id);
        self.by_target.entry(rel.to).or_default().insert(rel.id);
        self.by_id.insert(rel.id, rel);
    }

    pub fn remove(&mut self, id: &RelationshipId) -> Option<Relationship> {
        let rel = self.by_id.remove(id)?;
        if let Some(set) = self.by_source.get_mut(&rel.from) {
            set.remove(id);
            if set.is_empty() {
                self.by_source.remove(&rel.from);
            }
        }
        if let Some(set) = self.by_target.get_mut(&rel.to) {
            set.remove(id);
            if set.is_empty() {
                self.by_target.remove(&rel.to);
            }
        }
        Some(rel)
    }

    pub fn get(&self, id: &RelationshipId) -> Option<&Relationship> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Relationships touching an entity, used for delete cascades.
    pub fn touching(&self, id: &EntityId) -> Vec<Relationship> {
        let mut ids: BTreeSet<RelationshipId> = BTreeSet::new();
        if let Some(set) = self.by_source.get(id) {
            ids.extend(set.iter().copied());
        }
        if let Some(set) = self.by_target.get(id) {
            ids.extend(set.iter().copied());
        }
        ids.into_iter().filter_map(|rid| self.by_id.get(&rid).cloned()).collect()
    }

    /// Batched by-source lookup: one entry per input id that has any
    /// matching outgoing relationship.
    pub fn by_sources(
        &self,
        ids: &[EntityId],
        verb: Option<VerbType>,
    ) -> HashMap<EntityId, Vec<Relationship>> {
        let mut out: HashMap<EntityId, Vec<Relationship>> = HashMap::new();
        for id in ids {
            let Some(rel_ids) = self.by_source.get(id) else { continue };
            let rels: Vec<Relationship> = rel_ids
                .iter()
                .filter_map(|rid| self.by_id.get(rid))
                .filter(|rel| verb.map_or(true, |v| rel.verb == v))
                .cloned()
                .collect();
            if !rels.is_empty() {
                out.insert(*id, rels);
            }
        }
        out
    }

    /// Query with deterministic (created-at, id) ordering and paging.
    pub fn query(&self, q: &RelationQuery) -> Vec<Relationship> {
        let candidate_ids: Vec<RelationshipId> = match (&q.from, &q.to) {
            (Some(from), _) => {
                self.by_source.get(from).map(|s| s.iter().copied().collect()).unwrap_or_default()
            }
            (None, Some(to)) => {
                self.by_target.get(to).map(|s| s.iter().copied().collect()).unwrap_or_default()
            }
            (None, None) => self.by_id.keys().copied().collect(),
        };
        let mut rels: Vec<Relationship> = candidate_ids
            .into_iter()
            .filter_map(|rid| self.by_id.get(&rid))
            .filter(|rel| q.to.map_or(true, |to| rel.to == to))
            .filter(|rel| q.from.map_or(true, |from| rel.from == from))
            .filter(|rel| q.verb.map_or(true, |verb| rel.verb == verb))
            .cloned()
            .collect();
        rels.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rels.into_iter().skip(q.offset).take(q.limit.unwrap_or(usize::MAX)).collect()
    }
}

/// The full derived-state bundle for the active branch.
pub struct Indexes {
    pub hnsw: HnswIndex,
    pub metadata: MetadataIndex,
    pub graph: GraphIndex,
    pub relationships: RelationshipTable,
}

impl Indexes {
    pub fn empty(dim: usize, metric: engram_core::DistanceMetric, params: HnswParams) -> Self {
        Self {
            hnsw: HnswIndex::new(dim, metric, params),
            metadata: MetadataIndex::new(),
            graph: GraphIndex::new(),
            relationships: RelationshipTable::default(),
        }
    }

}
