//! Read/write caches. The LRU holds materialised entities populated on
//! `get`; the write buffer holds just-written entities so a `get`
//! immediately after `add` never pays a storage round-trip. The buffer
//! is dropped entry-by-entry on rollback and survives commits (it is a
//! cache of current state, not of uncommitted state).

use engram_core::{Entity, EntityId};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct EntityCache {
    lru: Mutex<LruCache<EntityId, Entity>>,
    write_buffer: dashmap::DashMap<EntityId, Entity>,
}

impl EntityCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self { lru: Mutex::new(LruCache::new(capacity)), write_buffer: dashmap::DashMap::new() }
    }

    /// Write-buffer first (freshest), then the LRU. Entities cached here
    /// never carry vectors; vector reads go to the store.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        if let Some(entry) = self.write_buffer.get(id) {
            return Some(entry.value().clone());
        }
        self.lru.lock().get(id).cloned()
    }

    pub fn populate(&self, entity: &Entity) {
        let mut slim = entity.clone();
        slim.vector = None;
        self.lru.lock().put(slim.id, slim);
    }

    /// Hot-path buffer insert on add/update.
    pub fn buffer_write(&self, entity: &Entity) {
        let mut slim = entity.clone();
        slim.vector = None;
        self.write_buffer.insert(slim.id, slim);
    }

    /// Rollback path: forget a buffered write and any cached copy.
    pub fn invalidate(&self, id: &EntityId) {
        self.write_buffer.remove(id);
        self.lru.lock().pop(id);
    }

    /// Commit path: buffered entries are now durable, migrate them into
    /// the LRU.
    pub fn flush_buffer(&self) {
        let ids: Vec<EntityId> = self.write_buffer.iter().map(|e| *e.key()).collect();
        let mut lru = self.lru.lock();
        for id in ids {
            if let Some((_, entity)) = self.write_buffer.remove(&id) {
                lru.put(id, entity);
            }
        }
    }

    pub fn clear(&self) {
        self.write_buffer.clear();
        self.lru.lock().clear();
    }

    #[cfg(test)]
    pub fn buffered_count(&self) -> usize {
        self.write_buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::{MetadataBag, NounType};

    fn entity() -> Entity {
        Entity {
            id: EntityId::new(),
            noun: NounType::Note,
            data: None,
            metadata: MetadataBag::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            service: None,
            vector: Some(vec![1.0; 4]),
        }
    }

    #[test]
    fn buffered_writes_are_visible_and_vectorless() {
        let cache = EntityCache::new(4);
        let e = entity();
        cache.buffer_write(&e);
        let got = cache.get(&e.id).unwrap();
        assert_eq!(got.id, e.id);
        assert!(got.vector.is_none());
    }

    #[test]
    fn flush_moves_buffer_into_lru() {
        let cache = EntityCache::new(4);
        let e = entity();
        cache.buffer_write(&e);
        cache.flush_buffer();
        assert_eq!(cache.buffered_count(), 0);
        assert!(cache.get(&e.id).is_some());
    }

    #[test]
    fn invalidate_forgets_everywhere() {
        let cache = EntityCache::new(4);
        let e = entity();
        cache.buffer_write(&e);
        cache.populate(&e);
        cache.invalidate(&e.id);
        assert!(cache.get(&e.id).is_none());
    }

    #[test]
    fn lru_evicts_oldest() {
        let cache = EntityCache::new(2);
        let (a, b, c) = (entity(), entity(), entity());
        cache.populate(&a);
        cache.populate(&b);
        cache.populate(&c);
        assert!(cache.get(&a.id).is_none());
        assert!(cache.get(&c.id).is_some());
    }
}
