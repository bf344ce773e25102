//! Backend Cache (spec.md §4.7, §5) — count-bounded LRU keyed by
//! `(bucket, index, manifest.etag)`.
//!
//! Grounded directly on the teacher's `src/storage.rs::DocCache`
//! (`HashMap` + `VecDeque` recency list), adapted from byte-capacity to
//! entry-count capacity: backend blobs vary too widely in size for a
//! byte budget to be a meaningful knob at this component's scale.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::ann::Backend;

pub fn cache_key(bucket: &str, index: &str, etag: &str) -> String {
    format!("{bucket}/{index}/{etag}")
}

pub struct BackendCache {
    capacity: usize,
    entries: HashMap<String, Arc<dyn Backend>>,
    lru_order: VecDeque<String>,
}

impl BackendCache {
    pub fn new(capacity: usize) -> Self {
        BackendCache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            lru_order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Arc<dyn Backend>> {
        if let Some(backend) = self.entries.get(key).cloned() {
            self.touch(key);
            return Some(backend);
        }
        None
    }

    pub fn insert(&mut self, key: String, backend: Arc<dyn Backend>) {
        if self.entries.contains_key(&key) {
            self.lru_order.retain(|k| k != &key);
        } else {
            while self.entries.len() >= self.capacity {
                if let Some(evict) = self.lru_order.pop_back() {
                    self.entries.remove(&evict);
                } else {
                    break;
                }
            }
        }
        self.lru_order.push_front(key.clone());
        self.entries.insert(key, backend);
    }

    pub fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.lru_order.retain(|k| k != key);
        }
    }

    fn touch(&mut self, key: &str) {
        self.lru_order.retain(|k| k != key);
        self.lru_order.push_front(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::graph::GraphBackend;
    use crate::models::Metric;

    fn backend() -> Arc<dyn Backend> {
        Arc::new(GraphBackend::new(Metric::Euclidean))
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut cache = BackendCache::new(2);
        cache.insert("b/i/e1".to_string(), backend());
        assert!(cache.get("b/i/e1").is_some());
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let mut cache = BackendCache::new(2);
        cache.insert("k1".to_string(), backend());
        cache.insert("k2".to_string(), backend());
        cache.get("k1");
        cache.insert("k3".to_string(), backend());
        assert!(cache.get("k2").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
    }

    #[test]
    fn re_insert_of_existing_key_does_not_shrink_cache() {
        let mut cache = BackendCache::new(2);
        cache.insert("k1".to_string(), backend());
        cache.insert("k1".to_string(), backend());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_key_composes_bucket_index_etag() {
        assert_eq!(cache_key("b1", "i1", "abc"), "b1/i1/abc");
    }
}
