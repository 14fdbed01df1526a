//! Per-chat values with a time-to-live, shared across concurrent handlers.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Concurrent map keyed by chat id. Entries older than `ttl` are invisible
/// and get purged on the next insert; at `capacity` the oldest entry goes.
#[derive(Debug)]
pub struct ChatCache<V> {
    entries: DashMap<i64, Entry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> ChatCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, chat_id: i64) -> Option<V> {
        self.entries
            .get(&chat_id)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, chat_id: i64, value: V) {
        self.purge_expired();
        if !self.entries.contains_key(&chat_id) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            chat_id,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, chat_id: i64) -> Option<V> {
        self.entries.remove(&chat_id).map(|(_, e)| e.value)
    }

    /// Stored entries, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.stored_at)
            .map(|e| *e.key());
        if let Some(chat_id) = oldest {
            self.entries.remove(&chat_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = ChatCache::new(Duration::from_secs(60), 10);
        cache.insert(1, "SELECT 1".to_string());
        assert_eq!(cache.get(1).as_deref(), Some("SELECT 1"));
        assert_eq!(cache.get(2), None);

        cache.insert(1, "SELECT 2".to_string());
        assert_eq!(cache.get(1).as_deref(), Some("SELECT 2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ChatCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, 20);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(3, 30);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(2), Some(20));
        assert_eq!(cache.get(3), Some(30));
    }

    #[tokio::test]
    async fn test_expired_entries_are_hidden_and_purged() {
        let cache = ChatCache::new(Duration::from_millis(20), 10);
        cache.insert(7, "old");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(7), None);

        cache.insert(8, "new");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(8), Some("new"));
        assert!(cache.is_empty());
    }
}
