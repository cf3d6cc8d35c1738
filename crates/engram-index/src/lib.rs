//! Engram Index - the metadata index: exact/existence lookups, sorted
//! range scans and a word index, all keyed by arena-style u32 handles.
//!
//! Derived state: the index holds its own copy of each entity's indexed
//! metadata so that unindexing and in-memory post-filters never read
//! storage, and is rebuilt from the entity store at startup.

use engram_core::{Entity, EntityId, FieldOp, Filter, MetadataBag, MetadataValue};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use tracing::trace;

mod words;

pub use words::{tokenize, WordIndex};

/// Interns entity ids as dense u32 handles. Handles are stable for the
/// lifetime of the index; a rebuild starts from a fresh registry.
#[derive(Debug, Default)]
pub struct IdRegistry {
    ids: Vec<EntityId>,
    handles: HashMap<EntityId, u32>,
}

impl IdRegistry {
    pub fn intern(&mut self, id: EntityId) -> u32 {
        if let Some(&h) = self.handles.get(&id) {
            return h;
        }
        let h = self.ids.len() as u32;
        self.ids.push(id);
        self.handles.insert(id, h);
        h
    }

    pub fn lookup(&self, id: &EntityId) -> Option<u32> {
        self.handles.get(id).copied()
    }

    pub fn entity_id(&self, handle: u32) -> Option<EntityId> {
        self.ids.get(handle as usize).copied()
    }
}

#[derive(Debug)]
struct IndexedDoc {
    bag: MetadataBag,
    data: Option<String>,
}

/// The three metadata sub-indexes behind one `index`/`unindex`/`query`
/// surface.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    registry: IdRegistry,
    docs: HashMap<u32, IndexedDoc>,
    /// `(field, value) -> handles`; list values are indexed per element.
    exact: HashMap<String, HashMap<MetadataValue, HashSet<u32>>>,
    /// Per-field sorted scalars for range scans.
    sorted: HashMap<String, BTreeMap<MetadataValue, HashSet<u32>>>,
    /// `field -> handles` that carry the field at all.
    members: HashMap<String, HashSet<u32>>,
    words: WordIndex,
    live: HashSet<u32>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.registry.lookup(id).is_some_and(|h| self.live.contains(&h))
    }

    /// Insert an entity into every applicable sub-index. Re-indexing an
    /// already-indexed id replaces its previous entries.
    pub fn index_entity(&mut self, entity: &Entity) {
        let handle = self.registry.intern(entity.id);
        if self.docs.contains_key(&handle) {
            self.unindex_handle(handle);
        }
        let bag = entity.indexed_metadata();
        for (field, value) in &bag {
            self.members.entry(field.clone()).or_default().insert(handle);
            match value {
                MetadataValue::List(items) => {
                    for item in items {
                        self.insert_exact(field, item.clone(), handle);
                        if let MetadataValue::String(s) = item {
                            self.words.index_text(handle, s);
                        }
                    }
                }
                scalar => {
                    self.insert_exact(field, scalar.clone(), handle);
                    self.sorted
                        .entry(field.clone())
                        .or_default()
                        .entry(scalar.clone())
                        .or_default()
                        .insert(handle);
                    if let MetadataValue::String(s) = scalar {
                        self.words.index_text(handle, s);
                    }
                }
            }
        }
        if let Some(data) = &entity.data {
            self.words.index_text(handle, data);
        }
        self.docs.insert(handle, IndexedDoc { bag, data: entity.data.clone() });
        self.live.insert(handle);
        trace!(id = %entity.id, handle, "indexed entity metadata");
    }

    /// Remove an entity from every sub-index.
    pub fn unindex_entity(&mut self, id: &EntityId) {
        if let Some(handle) = self.registry.lookup(id) {
            self.unindex_handle(handle);
        }
    }

    fn unindex_handle(&mut self, handle: u32) {
        let Some(doc) = self.docs.remove(&handle) else { return };
        for (field, value) in &doc.bag {
            if let Some(set) = self.members.get_mut(field) {
                set.remove(&handle);
                if set.is_empty() {
                    self.members.remove(field);
                }
            }
            match value {
                MetadataValue::List(items) => {
                    for item in items {
                        self.remove_exact(field, item, handle);
                        if let MetadataValue::String(s) = item {
                            self.words.unindex_text(handle, s);
                        }
                    }
                }
                scalar => {
                    self.remove_exact(field, scalar, handle);
                    if let Some(tree) = self.sorted.get_mut(field) {
                        if let Some(set) = tree.get_mut(scalar) {
                            set.remove(&handle);
                            if set.is_empty() {
                                tree.remove(scalar);
                            }
                        }
                        if tree.is_empty() {
                            self.sorted.remove(field);
                        }
                    }
                    if let MetadataValue::String(s) = scalar {
                        self.words.unindex_text(handle, s);
                    }
                }
            }
        }
        if let Some(data) = &doc.data {
            self.words.unindex_text(handle, data);
        }
        self.live.remove(&handle);
    }

    fn insert_exact(&mut self, field: &str, value: MetadataValue, handle: u32) {
        self.exact
            .entry(field.to_string())
            .or_default()
            .entry(value)
            .or_default()
            .insert(handle);
    }

    fn remove_exact(&mut self, field: &str, value: &MetadataValue, handle: u32) {
        if let Some(by_value) = self.exact.get_mut(field) {
            if let Some(set) = by_value.get_mut(value) {
                set.remove(&handle);
                if set.is_empty() {
                    by_value.remove(value);
                }
            }
            if by_value.is_empty() {
                self.exact.remove(field);
            }
        }
    }

    /// Evaluate a filter tree into the matching id set. AND children are
    /// evaluated cheapest-estimate first so the intersection narrows as
    /// early as possible.
    pub fn query(&self, filter: &Filter) -> HashSet<EntityId> {
        self.eval(filter)
            .into_iter()
            .filter_map(|h| self.registry.entity_id(h))
            .collect()
    }

    /// Term-overlap text search over the word index. Returns entity ids
    /// with scores in (0, 1], best first.
    pub fn text_search(&self, query: &str) -> Vec<(EntityId, f32)> {
        self.words
            .search(query)
            .into_iter()
            .filter(|(h, _)| self.live.contains(h))
            .filter_map(|(h, score)| self.registry.entity_id(h).map(|id| (id, score)))
            .collect()
    }

    /// Cardinality estimate used for AND ordering, from the per-field
    /// statistics the sub-indexes already maintain.
    pub fn estimate(&self, filter: &Filter) -> usize {
        match filter {
            Filter::AllOf(children) => {
                children.iter().map(|f| self.estimate(f)).min().unwrap_or(self.live.len())
            }
            Filter::AnyOf(children) => children
                .iter()
                .map(|f| self.estimate(f))
                .sum::<usize>()
                .min(self.live.len()),
            Filter::Not(inner) => self.live.len().saturating_sub(self.estimate(inner)),
            Filter::Field { field, op } => self.estimate_field(field, op),
        }
    }

    fn estimate_field(&self, field: &str, op: &FieldOp) -> usize {
        let field_total = self.members.get(field).map_or(0, HashSet::len);
        match op {
            FieldOp::Equals(value) => match value {
                MetadataValue::List(_) => field_total,
                scalar => self
                    .exact
                    .get(field)
                    .and_then(|by_value| by_value.get(scalar))
                    .map_or(0, HashSet::len),
            },
            FieldOp::OneOf(values) => values
                .iter()
                .map(|v| self.estimate_field(field, &FieldOp::Equals(v.clone())))
                .sum::<usize>()
                .min(field_total),
            FieldOp::NotEquals(_) | FieldOp::NoneOf(_) | FieldOp::Excludes(_) => {
                self.live.len()
            }
            FieldOp::Exists(true) => field_total,
            FieldOp::Exists(false) => self.live.len().saturating_sub(field_total),
            // Ranges and substring scans narrow less predictably; assume
            // they keep about a third of the field population.
            _ => (field_total / 3).max(1),
        }
    }

    fn eval(&self, filter: &Filter) -> HashSet<u32> {
        match filter {
            Filter::AllOf(children) => {
                if children.is_empty() {
                    return self.live.clone();
                }
                let mut ordered: Vec<&Filter> = children.iter().collect();
                ordered.sort_by_key(|f| self.estimate(f));
                let mut result = self.eval(ordered[0]);
                for child in &ordered[1..] {
                    if result.is_empty() {
                        break;
                    }
                    let next = self.eval(child);
                    result.retain(|h| next.contains(h));
                }
                result
            }
            Filter::AnyOf(children) => {
                let mut result = HashSet::new();
                for child in children {
                    result.extend(self.eval(child));
                }
                result
            }
            Filter::Not(inner) => {
                let matched = self.eval(inner);
                self.live.iter().copied().filter(|h| !matched.contains(h)).collect()
            }
            Filter::Field { field, op } => self.eval_field(field, op),
        }
    }

    fn eval_field(&self, field: &str, op: &FieldOp) -> HashSet<u32> {
        match op {
            FieldOp::Equals(value) => match value {
                MetadataValue::List(_) => self.post_filter(field, op),
                scalar => self
                    .exact
                    .get(field)
                    .and_then(|by_value| by_value.get(scalar))
                    .cloned()
                    .unwrap_or_default(),
            },
            FieldOp::OneOf(values) => {
                let mut result = HashSet::new();
                for value in values {
                    result.extend(self.eval_field(field, &FieldOp::Equals(value.clone())));
                }
                result
            }
            FieldOp::NotEquals(value) => {
                self.complement(&self.eval_field(field, &FieldOp::Equals(value.clone())))
            }
            FieldOp::NoneOf(values) => {
                self.complement(&self.eval_field(field, &FieldOp::OneOf(values.clone())))
            }
            FieldOp::Excludes(value) => {
                self.complement(&self.eval_field(field, &FieldOp::Contains(value.clone())))
            }
            FieldOp::GreaterThan(t) => self.range(field, Bound::Excluded(t), Bound::Unbounded, t),
            FieldOp::GreaterEqual(t) => self.range(field, Bound::Included(t), Bound::Unbounded, t),
            FieldOp::LessThan(t) => self.range(field, Bound::Unbounded, Bound::Excluded(t), t),
            FieldOp::LessEqual(t) => self.range(field, Bound::Unbounded, Bound::Included(t), t),
            FieldOp::Between(lo, hi) => {
                // Bounds of different kinds can never bracket a value.
                if lo > hi || !lo.comparable_with(hi) {
                    return HashSet::new();
                }
                self.range(field, Bound::Included(lo), Bound::Included(hi), lo)
            }
            FieldOp::Exists(true) => self.members.get(field).cloned().unwrap_or_default(),
            FieldOp::Exists(false) => {
                self.complement(&self.members.get(field).cloned().unwrap_or_default())
            }
            FieldOp::Contains(_)
            | FieldOp::HasAll(_)
            | FieldOp::StartsWith(_)
            | FieldOp::EndsWith(_)
            | FieldOp::Matches(_) => self.post_filter(field, op),
        }
    }

    /// Sorted-index range scan. Values of a different kind than the probe
    /// (the tree is ordered across types) are filtered out to match the
    /// linear-scan semantics.
    fn range(
        &self,
        field: &str,
        lo: Bound<&MetadataValue>,
        hi: Bound<&MetadataValue>,
        probe: &MetadataValue,
    ) -> HashSet<u32> {
        let Some(tree) = self.sorted.get(field) else { return HashSet::new() };
        let mut result = HashSet::new();
        for (value, handles) in tree.range::<MetadataValue, _>((lo, hi)) {
            if value.comparable_with(probe) {
                result.extend(handles.iter().copied());
            }
        }
        result
    }

    /// In-memory post-filter over the ids that carry the field, applied
    /// after the indexed prefix has narrowed the candidate set.
    fn post_filter(&self, field: &str, op: &FieldOp) -> HashSet<u32> {
        let Some(candidates) = self.members.get(field) else { return HashSet::new() };
        // Compile `matches` once per query rather than per candidate.
        let regex = match op {
            FieldOp::Matches(pattern) => match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(_) => return HashSet::new(),
            },
            _ => None,
        };
        candidates
            .iter()
            .copied()
            .filter(|h| {
                let value = self.docs.get(h).and_then(|doc| doc.bag.get(field));
                match (&regex, value) {
                    (Some(re), Some(v)) => v.as_str().is_some_and(|s| re.is_match(s)),
                    (Some(_), None) => false,
                    (None, v) => op.matches_value(v),
                }
            })
            .collect()
    }

    fn complement(&self, matched: &HashSet<u32>) -> HashSet<u32> {
        self.live.iter().copied().filter(|h| !matched.contains(h)).collect()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{MetadataBag, NounType};
    use proptest::prelude::*;
    use serde_json::json;

    fn entity(noun: NounType, data: Option<&str>, pairs: &[(&str, MetadataValue)]) -> Entity {
        Entity {
            id: EntityId::new(),
            noun,
            data: data.map(str::to_string),
            metadata: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            service: None,
            vector: None,
        }
    }

    fn filter(v: serde_json::Value) -> Filter {
        Filter::parse(&v).unwrap()
    }

    #[test]
    fn exact_queries_match_linear_scan() {
        let mut idx = MetadataIndex::new();
        let docs: Vec<Entity> = (0..50)
            .map(|i| {
                entity(
                    NounType::Document,
                    None,
                    &[("year", (2000 + (i % 5)).into()), ("bucket", format!("s{}", i % 3).into())],
                )
            })
            .collect();
        for d in &docs {
            idx.index_entity(d);
        }
        for f in [
            filter(json!({"year": 2003})),
            filter(json!({"bucket": "s1"})),
            filter(json!({"year": 2002, "bucket": "s0"})),
            filter(json!({"year": {"ne": 2001}})),
            filter(json!({"anyOf": [{"year": 2000}, {"bucket": "s2"}]})),
            filter(json!({"not": {"year": {"gte": 2003}}})),
        ] {
            let via_index = idx.query(&f);
            let via_scan: HashSet<EntityId> = docs
                .iter()
                .filter(|d| f.matches_bag(&d.indexed_metadata()))
                .map(|d| d.id)
                .collect();
            assert_eq!(via_index, via_scan, "filter {f:?} diverged from linear scan");
        }
    }

    #[test]
    fn range_queries_use_the_sorted_index() {
        let mut idx = MetadataIndex::new();
        let years: Vec<Entity> = [2020, 2022, 2024]
            .iter()
            .map(|y| entity(NounType::Document, None, &[("year", (*y).into())]))
            .collect();
        for e in &years {
            idx.index_entity(e);
        }
        let hits = idx.query(&filter(json!({"year": {"gte": 2022}})));
        assert_eq!(hits, HashSet::from([years[1].id, years[2].id]));

        let between = idx.query(&filter(json!({"year": {"between": [2020, 2022]}})));
        assert_eq!(between, HashSet::from([years[0].id, years[1].id]));

        // gte(a) is a superset of gte(b) for a <= b.
        let wide = idx.query(&filter(json!({"year": {"gte": 2020}})));
        assert!(hits.is_subset(&wide));
    }

    #[test]
    fn mixed_type_fields_do_not_leak_into_ranges() {
        let mut idx = MetadataIndex::new();
        let num = entity(NounType::Note, None, &[("v", 5.into())]);
        let text = entity(NounType::Note, None, &[("v", "zebra".into())]);
        idx.index_entity(&num);
        idx.index_entity(&text);
        let hits = idx.query(&filter(json!({"v": {"gt": 1}})));
        assert_eq!(hits, HashSet::from([num.id]));
    }

    #[test]
    fn noun_tag_is_queryable_via_reserved_key() {
        let mut idx = MetadataIndex::new();
        let doc = entity(NounType::Document, None, &[]);
        let person = entity(NounType::Person, None, &[]);
        idx.index_entity(&doc);
        idx.index_entity(&person);
        let hits = idx.query(&filter(json!({"noun": "document"})));
        assert_eq!(hits, HashSet::from([doc.id]));
    }

    #[test]
    fn string_operators_over_distinct_values() {
        let mut idx = MetadataIndex::new();
        let a = entity(NounType::Note, None, &[("title", "quick brown fox".into())]);
        let b = entity(NounType::Note, None, &[("title", "slow turtle".into())]);
        idx.index_entity(&a);
        idx.index_entity(&b);
        assert_eq!(idx.query(&filter(json!({"title": {"contains": "brown"}}))), HashSet::from([a.id]));
        assert_eq!(idx.query(&filter(json!({"title": {"startsWith": "slow"}}))), HashSet::from([b.id]));
        assert_eq!(idx.query(&filter(json!({"title": {"endsWith": "fox"}}))), HashSet::from([a.id]));
        assert_eq!(idx.query(&filter(json!({"title": {"matches": "t.rtle"}}))), HashSet::from([b.id]));
    }

    #[test]
    fn list_fields_support_membership_and_has_all() {
        let mut idx = MetadataIndex::new();
        let a = entity(NounType::Note, None, &[("tags", vec!["rust", "db"].into())]);
        let b = entity(NounType::Note, None, &[("tags", vec!["rust"].into())]);
        idx.index_entity(&a);
        idx.index_entity(&b);
        assert_eq!(idx.query(&filter(json!({"tags": "db"}))), HashSet::from([a.id]));
        assert_eq!(idx.query(&filter(json!({"tags": "rust"}))), HashSet::from([a.id, b.id]));
        assert_eq!(
            idx.query(&filter(json!({"tags": {"hasAll": ["rust", "db"]}}))),
            HashSet::from([a.id])
        );
        assert_eq!(idx.query(&filter(json!({"tags": {"excludes": "db"}}))), HashSet::from([b.id]));
    }

    #[test]
    fn unindex_reverses_index() {
        let mut idx = MetadataIndex::new();
        let e = entity(NounType::Note, Some("hello world"), &[("k", 1.into())]);
        idx.index_entity(&e);
        assert!(idx.contains(&e.id));
        idx.unindex_entity(&e.id);
        assert!(!idx.contains(&e.id));
        assert!(idx.query(&filter(json!({"k": 1}))).is_empty());
        assert!(idx.text_search("hello").is_empty());
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn reindex_replaces_previous_entries() {
        let mut idx = MetadataIndex::new();
        let mut e = entity(NounType::Note, None, &[("status", "open".into())]);
        idx.index_entity(&e);
        e.metadata.insert("status".into(), "closed".into());
        idx.index_entity(&e);
        assert!(idx.query(&filter(json!({"status": "open"}))).is_empty());
        assert_eq!(idx.query(&filter(json!({"status": "closed"}))), HashSet::from([e.id]));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn text_search_ranks_by_overlap() {
        let mut idx = MetadataIndex::new();
        let full = entity(NounType::Document, Some("quick brown fox"), &[]);
        let partial = entity(NounType::Document, Some("slow brown turtle"), &[]);
        idx.index_entity(&full);
        idx.index_entity(&partial);
        let hits = idx.text_search("quick fox");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, full.id);
        let hits = idx.text_search("brown");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn and_ordering_prefers_small_estimates() {
        let mut idx = MetadataIndex::new();
        for i in 0..100 {
            idx.index_entity(&entity(
                NounType::Note,
                None,
                &[("common", 1.into()), ("rare", (i / 99).into())],
            ));
        }
        let rare = Filter::parse(&json!({"rare": 1})).unwrap();
        let common = Filter::parse(&json!({"common": 1})).unwrap();
        assert!(idx.estimate(&rare) < idx.estimate(&common));
        let both = Filter::AllOf(vec![common, rare]);
        assert_eq!(idx.query(&both).len(), 1);
    }

    proptest! {
        #[test]
        fn arbitrary_equals_filters_match_linear_scan(
            values in prop::collection::vec(0i64..4, 1..40),
            probe in 0i64..4,
        ) {
            let mut idx = MetadataIndex::new();
            let docs: Vec<Entity> = values
                .iter()
                .map(|v| entity(NounType::Note, None, &[("v", (*v).into())]))
                .collect();
            for d in &docs {
                idx.index_entity(d);
            }
            let f = Filter::eq("v", probe);
            let via_index = idx.query(&f);
            let via_scan: HashSet<EntityId> = docs
                .iter()
                .filter(|d| f.matches_bag(&d.indexed_metadata()))
                .map(|d| d.id)
                .collect();
            prop_assert_eq!(via_index, via_scan);
        }
    }
}
