//! In-memory LRU image cache bounded by combined footprint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, DecodedImage};
use crate::domain::ports::{CacheStats, ImageCachePort};

/// Footprint function: maps an image to the units capacity is measured in.
pub type SizeFn = Arc<dyn Fn(&DecodedImage) -> usize + Send + Sync>;

struct Entry {
    image: Arc<DecodedImage>,
    footprint: usize,
}

struct Resident {
    entries: LruCache<CacheKey, Entry>,
    footprint: usize,
}

/// In-memory LRU cache for decoded images.
///
/// Capacity is a budget over the summed footprint of resident images, not an
/// item count. Thread-safe; every operation takes one short lock.
pub struct MemoryImageCache {
    resident: Mutex<Resident>,
    capacity: usize,
    size_of: SizeFn,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache holding at most `capacity_kb` kilobytes of decoded pixels.
    #[must_use]
    pub fn new(capacity_kb: usize) -> Self {
        Self::with_size_fn(capacity_kb, Arc::new(DecodedImage::footprint_kb))
    }

    /// Creates a cache with a custom footprint function.
    #[must_use]
    pub fn with_size_fn(capacity: usize, size_of: SizeFn) -> Self {
        Self {
            resident: Mutex::new(Resident {
                entries: LruCache::unbounded(),
                footprint: 0,
            }),
            capacity,
            size_of,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Configured capacity in footprint units.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Combined footprint of resident images.
    #[must_use]
    pub fn footprint(&self) -> usize {
        self.resident.lock().footprint
    }

    /// Returns true if `key` is resident, without touching recency.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.resident.lock().entries.contains(key)
    }

    fn trim(&self, resident: &mut Resident) {
        // The newest entry stays even if it alone exceeds capacity.
        while resident.footprint > self.capacity && resident.entries.len() > 1 {
            let Some((key, entry)) = resident.entries.pop_lru() else {
                break;
            };
            resident.footprint -= entry.footprint;
            debug!(key = %key, footprint = entry.footprint, "Evicted image from memory cache");
        }
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("capacity", &self.capacity)
            .field("footprint", &self.footprint())
            .finish_non_exhaustive()
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let mut resident = self.resident.lock();
        if let Some(entry) = resident.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn peek(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let resident = self.resident.lock();
        resident.entries.peek(key).map(|entry| entry.image.clone())
    }

    fn put(&self, key: CacheKey, image: Arc<DecodedImage>) -> bool {
        let mut resident = self.resident.lock();
        if resident.entries.contains(&key) {
            trace!(key = %key, "Memory cache already holds key, keeping existing image");
            return false;
        }

        let footprint = (self.size_of)(&image);
        debug!(key = %key, footprint, "Storing image in memory cache");
        resident.entries.put(key, Entry { image, footprint });
        resident.footprint += footprint;
        self.trim(&mut resident);
        true
    }

    fn evict(&self, key: &CacheKey) -> bool {
        let mut resident = self.resident.lock();
        if let Some(entry) = resident.entries.pop(key) {
            resident.footprint -= entry.footprint;
            debug!(key = %key, "Evicted image from memory cache");
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.resident.lock().entries.len()
    }

    fn clear(&self) {
        let mut resident = self.resident.lock();
        resident.entries.clear();
        resident.footprint = 0;
        debug!("Cleared memory image cache");
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let resident = self.resident.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: resident.entries.len(),
            footprint_kb: resident.footprint,
            capacity_kb: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Image whose RGBA buffer is exactly `kb` kilobytes.
    fn image_kb(kb: u32) -> Arc<DecodedImage> {
        Arc::new(DecodedImage::new(image::DynamicImage::new_rgba8(16, 16 * kb)))
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name)
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::new(10);
        let img = Arc::new(DecodedImage::new(image::DynamicImage::new_rgb8(40, 20)));

        assert!(cache.put(key("test1"), img));
        let retrieved = cache.get(&key("test1"));

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().width(), 40);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::new(10);
        assert!(cache.get(&key("nonexistent")).is_none());
    }

    #[test]
    fn test_footprint_accounting() {
        let cache = MemoryImageCache::new(10);
        cache.put(key("a"), image_kb(3));
        cache.put(key("b"), image_kb(4));
        assert_eq!(cache.footprint(), 7);

        cache.evict(&key("a"));
        assert_eq!(cache.footprint(), 4);

        cache.clear();
        assert_eq!(cache.footprint(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_does_not_overwrite() {
        let cache = MemoryImageCache::new(100);
        let first = image_kb(1);
        let second = image_kb(2);

        assert!(cache.put(key("a"), first.clone()));
        assert!(!cache.put(key("a"), second));

        let held = cache.peek(&key("a")).unwrap();
        assert!(Arc::ptr_eq(&held, &first));
        assert_eq!(cache.footprint(), 1);
    }

    #[test]
    fn test_cache_eviction_by_footprint() {
        let cache = MemoryImageCache::new(10);

        cache.put(key("a"), image_kb(4));
        cache.put(key("b"), image_kb(4));
        cache.put(key("c"), image_kb(4));

        // a is least recently used
        assert!(cache.peek(&key("a")).is_none());
        assert!(cache.peek(&key("b")).is_some());
        assert!(cache.peek(&key("c")).is_some());
        assert_eq!(cache.footprint(), 8);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = MemoryImageCache::new(10);

        cache.put(key("a"), image_kb(4));
        cache.put(key("b"), image_kb(4));
        let _ = cache.get(&key("a"));
        cache.put(key("c"), image_kb(4));

        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("b")).is_none());
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(10);

        cache.put(key("a"), image_kb(4));
        cache.put(key("b"), image_kb(4));
        let _ = cache.peek(&key("a"));
        cache.put(key("c"), image_kb(4));

        assert!(cache.peek(&key("a")).is_none());
    }

    #[test]
    fn test_eviction_order_follows_insertion_on_ties() {
        let cache = MemoryImageCache::new(3);
        cache.put(key("a"), image_kb(1));
        cache.put(key("b"), image_kb(1));
        cache.put(key("c"), image_kb(1));

        cache.put(key("d"), image_kb(2));

        assert!(cache.peek(&key("a")).is_none());
        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("c")).is_some());
        assert!(cache.peek(&key("d")).is_some());
    }

    #[test]
    fn test_oversize_entry_is_admitted_alone() {
        let cache = MemoryImageCache::new(5);
        cache.put(key("a"), image_kb(2));
        cache.put(key("b"), image_kb(2));

        assert!(cache.put(key("huge"), image_kb(8)));

        assert_eq!(cache.len(), 1);
        assert!(cache.peek(&key("huge")).is_some());

        // The next insertion pushes the oversize entry out.
        cache.put(key("c"), image_kb(1));
        assert!(cache.peek(&key("huge")).is_none());
        assert_eq!(cache.footprint(), 1);
    }

    #[test]
    fn test_footprint_never_exceeds_capacity() {
        let capacity = 17;
        let cache = MemoryImageCache::new(capacity);
        let mut state: u32 = 0x2545_f491;

        for i in 0..400 {
            // xorshift keeps the sequence deterministic
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let kb = state % 6 + 1;
            let name = format!("k{}", state % 40);
            if i % 3 == 0 {
                let _ = cache.get(&key(&name));
            } else {
                cache.put(key(&name), image_kb(kb));
            }
            assert!(cache.footprint() <= capacity, "step {i}");
        }
    }

    #[test]
    fn test_custom_size_fn_counts_items() {
        let cache = MemoryImageCache::with_size_fn(2, Arc::new(|_| 1));
        cache.put(key("a"), image_kb(50));
        cache.put(key("b"), image_kb(50));
        cache.put(key("c"), image_kb(50));

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&key("a")).is_none());
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(10);
        cache.put(key("test1"), image_kb(2));

        let _ = cache.get(&key("test1"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.footprint_kb, 2);
        assert_eq!(stats.capacity_kb, 10);
    }
}
