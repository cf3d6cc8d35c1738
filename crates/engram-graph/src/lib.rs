//! Engram Graph - bidirectional adjacency index over typed relationships.
//!
//! Both directions are id-keyed maps of id-sets; ids act as arena handles
//! and no node ever references another node's storage. Mutations are O(1);
//! traversal cost is bounded by an explicit visited-node budget.

use engram_core::{EntityId, VerbType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::trace;

/// Default cap on nodes visited by [`GraphIndex::reachable`].
pub const DEFAULT_NODE_BUDGET: usize = 10_000;

/// Traversal direction relative to the anchor entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    #[default]
    Out,
    In,
    Both,
}

/// Options for [`GraphIndex::neighbors`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborQuery {
    pub direction: Direction,
    pub verb: Option<VerbType>,
    pub limit: Option<usize>,
    pub offset: usize,
}

type AdjacencyMap = HashMap<EntityId, HashMap<VerbType, BTreeSet<EntityId>>>;

/// In-memory adjacency index. Derived state: rebuilt from stored
/// relationships at startup, mutated through the transaction layer.
#[derive(Debug, Default)]
pub struct GraphIndex {
    outgoing: AdjacencyMap,
    incoming: AdjacencyMap,
    edge_count: usize,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Insert an edge. Returns false if it was already present.
    pub fn add_edge(&mut self, from: EntityId, to: EntityId, verb: VerbType) -> bool {
        let inserted = self
            .outgoing
            .entry(from)
            .or_default()
            .entry(verb)
            .or_default()
            .insert(to);
        if inserted {
            self.incoming.entry(to).or_default().entry(verb).or_default().insert(from);
            self.edge_count += 1;
        }
        inserted
    }

    /// Remove an edge. Returns false if it was not present.
    pub fn remove_edge(&mut self, from: EntityId, to: EntityId, verb: VerbType) -> bool {
        let removed = Self::remove_from(&mut self.outgoing, &from, verb, &to);
        if removed {
            Self::remove_from(&mut self.incoming, &to, verb, &from);
            self.edge_count -= 1;
        }
        removed
    }

    fn remove_from(
        map: &mut AdjacencyMap,
        key: &EntityId,
        verb: VerbType,
        other: &EntityId,
    ) -> bool {
        let Some(by_verb) = map.get_mut(key) else { return false };
        let Some(set) = by_verb.get_mut(&verb) else { return false };
        let removed = set.remove(other);
        if set.is_empty() {
            by_verb.remove(&verb);
            if by_verb.is_empty() {
                map.remove(key);
            }
        }
        removed
    }

    /// Every edge touching `id`, as `(from, verb, to)` triples. Used when
    /// an entity is deleted to unlink its relationships.
    pub fn touching_edges(&self, id: &EntityId) -> Vec<(EntityId, VerbType, EntityId)> {
        let mut edges = Vec::new();
        if let Some(by_verb) = self.outgoing.get(id) {
            for (verb, targets) in by_verb {
                edges.extend(targets.iter().map(|to| (*id, *verb, *to)));
            }
        }
        if let Some(by_verb) = self.incoming.get(id) {
            for (verb, sources) in by_verb {
                edges.extend(sources.iter().map(|from| (*from, *verb, *id)));
            }
        }
        edges
    }

    /// Direct neighbors in deterministic (id-lexicographic) order with
    /// pagination. O(1) lookup plus O(k) materialisation.
    pub fn neighbors(&self, id: &EntityId, query: NeighborQuery) -> Vec<EntityId> {
        let mut result: BTreeSet<EntityId> = BTreeSet::new();
        let maps: &[&AdjacencyMap] = match query.direction {
            Direction::Out => &[&self.outgoing],
            Direction::In => &[&self.incoming],
            Direction::Both => &[&self.outgoing, &self.incoming],
        };
        for map in maps {
            let Some(by_verb) = map.get(id) else { continue };
            match query.verb {
                Some(verb) => {
                    if let Some(set) = by_verb.get(&verb) {
                        result.extend(set.iter().copied());
                    }
                }
                None => {
                    for set in by_verb.values() {
                        result.extend(set.iter().copied());
                    }
                }
            }
        }
        result
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Breadth-first reachability up to `depth` hops, excluding the
    /// origin. Work is capped by `node_budget` visited nodes so a dense
    /// hub cannot make a query unbounded.
    pub fn reachable(
        &self,
        origin: &EntityId,
        depth: usize,
        direction: Direction,
        verb: Option<VerbType>,
        node_budget: usize,
    ) -> HashSet<EntityId> {
        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut frontier: VecDeque<(EntityId, usize)> = VecDeque::new();
        let mut visited = 0usize;
        seen.insert(*origin);
        frontier.push_back((*origin, 0));
        while let Some((node, hops)) = frontier.pop_front() {
            if hops >= depth {
                continue;
            }
            visited += 1;
            if visited > node_budget {
                trace!(%origin, visited, "reachability budget exhausted");
                break;
            }
            let next = NeighborQuery { direction, verb, ..Default::default() };
            for neighbor in self.neighbors(&node, next) {
                if seen.insert(neighbor) {
                    frontier.push_back((neighbor, hops + 1));
                }
            }
        }
        seen.remove(origin);
        seen
    }
}
