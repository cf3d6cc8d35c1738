use crate::{dot, l2_norm};
use engram_core::{DistanceMetric, EntityId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// HNSW construction and search parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswParams {
    /// Connections per node per layer above layer 0.
    pub m: usize,
    /// Connections per node at layer 0 (2M by convention).
    pub m_max0: usize,
    /// Candidate list size during insertion.
    pub ef_construction: usize,
    /// Default candidate list size during search.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self { m: 16, m_max0: 32, ef_construction: 200, ef_search: 100 }
    }
}

impl HnswParams {
    fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }
}

/// One k-NN result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: EntityId,
    /// Distance under the index metric; smaller is closer.
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node {
    pub id: EntityId,
    pub vector: Vec<f32>,
    pub norm: f32,
    pub level: usize,
    /// Neighbor lists for layers 0..=level.
    pub neighbors: Vec<Vec<u32>>,
    pub deleted: bool,
}

/// Distance-ordered candidate with a node-index tiebreak for determinism.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    node: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist).then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug)]
pub struct HnswIndex {
    pub(crate) params: HnswParams,
    pub(crate) metric: DistanceMetric,
    pub(crate) dim: usize,
    pub(crate) nodes: Vec<Node>,
    pub(crate) by_id: HashMap<EntityId, u32>,
    pub(crate) entry: Option<u32>,
    pub(crate) max_level: usize,
    pub(crate) deleted_count: usize,
}

impl HnswIndex {
    pub fn new(dim: usize, metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            params,
            metric,
            dim,
            nodes: Vec::new(),
            by_id: HashMap::new(),
            entry: None,
            max_level: 0,
            deleted_count: 0,
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of live (non-deleted) nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.deleted_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.by_id.get(id).is_some_and(|&n| !self.nodes[n as usize].deleted)
    }

    /// The stored vector for a live id (used by `similar`).
    pub fn vector_of(&self, id: &EntityId) -> Option<&[f32]> {
        let &n = self.by_id.get(id)?;
        let node = &self.nodes[n as usize];
        (!node.deleted).then_some(node.vector.as_slice())
    }

    fn distance(&self, a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => {
                let denom = norm_a * norm_b;
                if denom <= f32::EPSILON {
                    1.0
                } else {
                    1.0 - dot(a, b) / denom
                }
            }
            DistanceMetric::InnerProduct => -dot(a, b),
        }
    }

    fn distance_to_node(&self, query: &[f32], query_norm: f32, node: u32) -> f32 {
        let n = &self.nodes[node as usize];
        self.distance(query, query_norm, &n.vector, n.norm)
    }

    /// Geometric level assignment derived from the id hash, so rebuilds
    /// reproduce the same levels independent of scan order.
    fn assign_level(&self, id: &EntityId) -> usize {
        let bytes = id.as_uuid().as_bytes();
        let seed = u64::from_le_bytes(bytes[0..8].try_into().expect("uuid has 16 bytes"));
        let hashed = splitmix64(seed);
        // 53 high bits -> uniform in [0, 1).
        let unit = ((hashed >> 11) as f64) / ((1u64 << 53) as f64);
        let unit = unit.max(1e-12);
        (((-unit.ln()) * self.params.level_multiplier()) as usize).min(31)
    }

    /// Insert a vector. An id that already has a live node is replaced
    /// (soft-delete then insert), which is how updates arrive.
    pub fn insert(&mut self, id: EntityId, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dim, "dimension is validated at the API boundary");
        if self.contains(&id) {
            self.delete(&id);
        }
        let norm = l2_norm(&vector);
        let level = self.assign_level(&id);
        let new_index = self.nodes.len() as u32;
        self.nodes.push(Node {
            id,
            vector,
            norm,
            level,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.by_id.insert(id, new_index);

        let Some(mut ep) = self.entry else {
            self.entry = Some(new_index);
            self.max_level = level;
            return;
        };

        let query = self.nodes[new_index as usize].vector.clone();
        let query_norm = self.nodes[new_index as usize].norm;

        // Greedy descent through layers above the new node's level.
        for layer in ((level + 1)..=self.max_level).rev() {
            ep = self.greedy_closest(&query, query_norm, ep, layer);
        }

        // Connect on each layer from min(level, max_level) down to 0.
        let mut entry_points = vec![ep];
        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(
                &query,
                query_norm,
                &entry_points,
                self.params.ef_construction,
                layer,
            );
            let selected = self.select_neighbors(&found, self.params.m);
            for &neighbor in &selected {
                self.nodes[new_index as usize].neighbors[layer].push(neighbor);
                self.nodes[neighbor as usize].neighbors[layer].push(new_index);
                self.prune(neighbor, layer);
            }
            entry_points = found.iter().map(|c| c.node).collect();
            if entry_points.is_empty() {
                entry_points = vec![ep];
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(new_index);
        }
    }

    /// Re-select the top-M neighbors of an over-connected node.
    fn prune(&mut self, node: u32, layer: usize) {
        let cap = self.params.max_links(layer);
        if self.nodes[node as usize].neighbors[layer].len() <= cap {
            return;
        }
        let base = self.nodes[node as usize].vector.clone();
        let base_norm = self.nodes[node as usize].norm;
        let candidates: Vec<Candidate> = self.nodes[node as usize].neighbors[layer]
            .iter()
            .map(|&n| Candidate { dist: self.distance_to_node(&base, base_norm, n), node: n })
            .collect();
        let kept = self.select_neighbors(&candidates, cap);
        self.nodes[node as usize].neighbors[layer] = kept;
    }

    /// Neighbor selection heuristic (Malkov & Yashunin, alg. 4): walk
    /// candidates nearest-first (`dist` is the distance to the anchor)
    /// and keep one only if it is closer to the anchor than to every
    /// already-kept neighbor, preferring diversity over raw proximity.
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<u32> {
        let mut sorted: Vec<Candidate> = candidates
            .iter()
            .copied()
            .filter(|c| !self.nodes[c.node as usize].deleted)
            .collect();
        sorted.sort();
        let mut kept: Vec<Candidate> = Vec::with_capacity(m);
        for c in sorted {
            if kept.len() >= m {
                break;
            }
            let c_node = &self.nodes[c.node as usize];
            let diverse = kept.iter().all(|k| {
                let k_node = &self.nodes[k.node as usize];
                let between =
                    self.distance(&c_node.vector, c_node.norm, &k_node.vector, k_node.norm);
                c.dist < between
            });
            if diverse {
                kept.push(c);
            }
        }
        kept.into_iter().map(|c| c.node).collect()
    }

    /// Single-entry greedy walk used on layers above the target.
    fn greedy_closest(&self, query: &[f32], query_norm: f32, start: u32, layer: usize) -> u32 {
        let mut current = start;
        let mut current_dist = self.distance_to_node(query, query_norm, current);
        loop {
            let mut improved = false;
            let neighbors = &self.nodes[current as usize].neighbors;
            if layer < neighbors.len() {
                for &n in &neighbors[layer] {
                    let d = self.distance_to_node(query, query_norm, n);
                    if d < current_dist {
                        current = n;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first dynamic-list search on one layer. Deleted nodes still
    /// route (their links are intact) but never enter the result list.
    fn search_layer(
        &self,
        query: &[f32],
        query_norm: f32,
        entry_points: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        // Min-heap of candidates to expand, max-heap of current results.
        let mut to_expand: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let c = Candidate { dist: self.distance_to_node(query, query_norm, ep), node: ep };
            to_expand.push(std::cmp::Reverse(c));
            results.push(c);
        }

        while let Some(std::cmp::Reverse(current)) = to_expand.pop() {
            let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if current.dist > worst && results.len() >= ef {
                break;
            }
            let neighbors = &self.nodes[current.node as usize].neighbors;
            if layer >= neighbors.len() {
                continue;
            }
            for &n in &neighbors[layer] {
                if !visited.insert(n) {
                    continue;
                }
                let c = Candidate { dist: self.distance_to_node(query, query_norm, n), node: n };
                let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || c.dist < worst {
                    to_expand.push(std::cmp::Reverse(c));
                    results.push(c);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_vec();
        out.sort();
        out
    }

    /// k nearest neighbors of `query` with an explicit candidate list
    /// size. Results come back nearest-first.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<SearchHit> {
        let Some(entry) = self.entry else { return Vec::new() };
        if k == 0 {
            return Vec::new();
        }
        let query_norm = l2_norm(query);
        let mut ep = entry;
        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_closest(query, query_norm, ep, layer);
        }
        let found = self.search_layer(query, query_norm, &[ep], ef.max(k), 0);
        found
            .into_iter()
            .filter(|c| !self.nodes[c.node as usize].deleted)
            .take(k)
            .map(|c| SearchHit { id: self.nodes[c.node as usize].id, distance: c.dist })
            .collect()
    }

    /// Soft delete. The node keeps routing traffic until compaction.
    /// Returns false if the id has no live node.
    pub fn delete(&mut self, id: &EntityId) -> bool {
        let Some(&n) = self.by_id.get(id) else { return false };
        let node = &mut self.nodes[n as usize];
        if node.deleted {
            return false;
        }
        node.deleted = true;
        self.deleted_count += 1;
        true
    }

    /// Undo a soft delete (transaction rollback path).
    pub fn undelete(&mut self, id: &EntityId) -> bool {
        let Some(&n) = self.by_id.get(id) else { return false };
        let node = &mut self.nodes[n as usize];
        if !node.deleted {
            return false;
        }
        node.deleted = false;
        self.deleted_count -= 1;
        true
    }

    /// Whether the soft-deleted fraction crossed the compaction
    /// threshold (20%).
    pub fn needs_compaction(&self) -> bool {
        !self.nodes.is_empty() && self.deleted_count * 5 > self.nodes.len()
    }

    /// Rebuild the graph from live nodes only. Runs off the write path;
    /// the caller swaps the result in under its lock.
    pub fn compact(&self) -> HnswIndex {
        let mut fresh = HnswIndex::new(self.dim, self.metric, self.params);
        for node in &self.nodes {
            if !node.deleted {
                fresh.insert(node.id, node.vector.clone());
            }
        }
        debug!(
            before = self.nodes.len(),
            after = fresh.nodes.len(),
            "compacted vector index"
        );
        fresh
    }

    /// Live ids in insertion order (rebuild and test support).
    pub fn live_ids(&self) -> Vec<EntityId> {
        self.nodes.iter().filter(|n| !n.deleted).map(|n| n.id).collect()
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
