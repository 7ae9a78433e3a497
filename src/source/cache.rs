//! In-memory store for uploaded quiz PDFs
//!
//! Uploads leave the store when they are least recently used and the entry or byte budget is
//! full, or once their time-to-live lapses.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default lifetime of an uploaded PDF
pub const DEFAULT_UPLOAD_TTL: Duration = Duration::from_secs(60);

/// A stored upload
#[derive(Debug, Clone)]
pub struct CachedPdf {
    /// Stored file name, `{timestamp}-{original name}`
    pub file_name: String,
    pub data: Vec<u8>,
    stored_at: Instant,
}

impl CachedPdf {
    fn expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= ttl
    }
}

struct Store {
    entries: LruCache<String, CachedPdf>,
    bytes: usize,
}

impl Store {
    fn take(&mut self, key: &str) -> Option<CachedPdf> {
        let entry = self.entries.pop(key)?;
        self.bytes -= entry.data.len();
        Some(entry)
    }

    /// Evict least recently used uploads until `incoming` more bytes fit in `budget`
    fn make_room(&mut self, incoming: usize, budget: usize) {
        while self.bytes + incoming > budget {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.bytes -= entry.data.len();
            tracing::debug!(key = %key, bytes = entry.data.len(), "evicted upload");
        }
    }

    fn fresh_key(&self) -> String {
        std::iter::repeat_with(|| Uuid::new_v4().to_string())
            .find(|key| !self.entries.contains(key))
            .unwrap_or_default()
    }
}

pub struct CacheManager {
    store: Mutex<Store>,
    max_bytes: usize,
    ttl: Duration,
}

impl CacheManager {
    /// A store holding at most `max_entries` uploads and `max_bytes` bytes, with the default TTL
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Mutex::new(Store {
                entries: LruCache::new(cap),
                bytes: 0,
            }),
            max_bytes,
            ttl: DEFAULT_UPLOAD_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store an upload under a freshly generated key.
    ///
    /// Returns `None` when the data alone is larger than the byte budget.
    pub fn insert(&self, file_name: String, data: Vec<u8>) -> Option<String> {
        if data.len() > self.max_bytes {
            return None;
        }

        let mut store = self.store.lock();
        store.make_room(data.len(), self.max_bytes);

        let key = store.fresh_key();
        store.bytes += data.len();
        let entry = CachedPdf {
            file_name,
            data,
            stored_at: Instant::now(),
        };
        // the entry cap may push one more upload out
        if let Some((_, evicted)) = store.entries.push(key.clone(), entry) {
            store.bytes -= evicted.data.len();
        }
        Some(key)
    }

    /// Fetch a live upload. An expired one is dropped on the way.
    pub fn get(&self, key: &str) -> Option<CachedPdf> {
        let mut store = self.store.lock();
        if store.entries.get(key)?.expired(self.ttl, Instant::now()) {
            store.take(key);
            tracing::debug!(key, "upload expired");
            return None;
        }
        store.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &str) -> Option<CachedPdf> {
        self.store.lock().take(key)
    }

    /// Drop every expired upload, returning how many went
    pub fn purge_expired(&self) -> usize {
        let mut store = self.store.lock();
        let now = Instant::now();
        let stale: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.expired(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            store.take(key);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.store.lock().bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(cache: &CacheManager, name: &str, size: usize) -> String {
        cache
            .insert(format!("{}.pdf", name), vec![b'%'; size])
            .unwrap()
    }

    #[test]
    fn test_insert_then_get() {
        let cache = CacheManager::new(4, 1024);
        let key = cache.insert("quiz.pdf".to_string(), vec![1, 2, 3]).unwrap();

        assert_eq!(key.len(), 36);
        let stored = cache.get(&key).unwrap();
        assert_eq!(stored.file_name, "quiz.pdf");
        assert_eq!(stored.data, vec![1, 2, 3]);
        assert_eq!((cache.len(), cache.total_bytes()), (1, 3));
        assert!(!cache.contains("some-other-key"));
    }

    #[test]
    fn test_keys_are_distinct() {
        let cache = CacheManager::new(4, 1024);
        let a = upload(&cache, "a", 1);
        let b = upload(&cache, "a", 1);
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entry_cap_evicts_oldest() {
        let cache = CacheManager::new(2, 1024);
        let first = upload(&cache, "first", 10);
        let second = upload(&cache, "second", 10);
        let third = upload(&cache, "third", 10);

        assert!(!cache.contains(&first));
        assert!(cache.contains(&second) && cache.contains(&third));
        assert_eq!(cache.total_bytes(), 20);
    }

    #[test]
    fn test_byte_budget_evicts_least_recent() {
        let cache = CacheManager::new(8, 100);
        let first = upload(&cache, "first", 40);
        let second = upload(&cache, "second", 40);

        // touching the first upload makes the second the eviction candidate
        assert!(cache.contains(&first));
        let third = upload(&cache, "third", 40);

        assert!(cache.contains(&first));
        assert!(!cache.contains(&second));
        assert!(cache.contains(&third));
        assert_eq!(cache.total_bytes(), 80);
    }

    #[test]
    fn test_upload_larger_than_budget() {
        let cache = CacheManager::new(8, 50);
        upload(&cache, "kept", 20);

        assert!(cache.insert("huge.pdf".to_string(), vec![0; 51]).is_none());
        assert_eq!((cache.len(), cache.total_bytes()), (1, 20));
    }

    #[test]
    fn test_remove() {
        let cache = CacheManager::new(8, 1024);
        let key = upload(&cache, "quiz", 12);

        assert_eq!(cache.remove(&key).unwrap().file_name, "quiz.pdf");
        assert!(cache.remove(&key).is_none());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_expired_upload_dropped_on_get() {
        let cache = CacheManager::new(8, 1024).with_ttl(Duration::ZERO);
        let key = upload(&cache, "quiz", 5);

        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = CacheManager::new(8, 1024).with_ttl(Duration::from_millis(20));
        upload(&cache, "a", 1);
        upload(&cache, "b", 1);
        assert_eq!(cache.purge_expired(), 0);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_default_ttl_is_one_minute() {
        assert_eq!(CacheManager::new(1, 1).ttl(), Duration::from_secs(60));
    }
}
