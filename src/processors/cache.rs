//! Content-addressed cache for preprocessing results.
//!
//! Wraps any preprocessing function with a bounded, least-recently-used
//! cache keyed by an operation name and a cheap content hash of the input
//! image. The hash samples a subset of rows rather than the full buffer, so
//! hashing stays cheap for large frames.
//!
//! The table lookup and mutation are lock-protected, but the compute step
//! runs outside the lock so one slow miss cannot block unrelated lookups.
//! Concurrent misses for the same key may both compute; the later writer
//! wins, which is acceptable because entries are pure functions of their
//! inputs.

use image::DynamicImage;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

struct CacheEntry {
    input_hash: u64,
    result: DynamicImage,
    last_access: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    hits: u64,
    misses: u64,
    clock: u64,
}

/// Bounded LRU cache for preprocessed images.
pub struct PreprocessCache {
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for PreprocessCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("cache lock poisoned");
        f.debug_struct("PreprocessCache")
            .field("entries", &inner.entries.len())
            .field("max_size", &inner.max_size)
            .field("hits", &inner.hits)
            .field("misses", &inner.misses)
            .finish()
    }
}

impl PreprocessCache {
    /// Creates a cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                max_size: max_size.max(1),
                hits: 0,
                misses: 0,
                clock: 0,
            }),
        }
    }

    /// Returns the cached result for `(key, image)` or computes and stores it.
    ///
    /// The compute function runs without the cache lock held.
    pub fn get_or_compute(
        &self,
        image: &DynamicImage,
        key: &str,
        compute: impl FnOnce(&DynamicImage) -> DynamicImage,
    ) -> DynamicImage {
        let input_hash = Self::content_hash(image);

        {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner.clock += 1;
            let clock = inner.clock;
            if let Some(entry) = inner.entries.get_mut(key) {
                if entry.input_hash == input_hash {
                    entry.last_access = clock;
                    let result = entry.result.clone();
                    inner.hits += 1;
                    return result;
                }
            }
            inner.misses += 1;
        }

        let result = compute(image);

        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.entries.len() >= inner.max_size && !inner.entries.contains_key(key) {
            Self::evict_oldest(&mut inner);
        }
        inner.clock += 1;
        let clock = inner.clock;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                input_hash,
                result: result.clone(),
                last_access: clock,
            },
        );
        result
    }

    /// Removes all entries and resets the hit/miss counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Shrinks the capacity, evicting least-recently-used entries as needed.
    pub fn set_max_size(&self, max_size: usize) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.max_size = max_size.max(1);
        while inner.entries.len() > inner.max_size {
            Self::evict_oldest(&mut inner);
        }
    }

    /// Hit ratio so far; zero before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock().expect("cache lock poisoned");
        let total = inner.hits + inner.misses;
        if total > 0 {
            inner.hits as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Number of hits and misses so far.
    pub fn counters(&self) -> (u64, u64) {
        let inner = self.inner.lock().expect("cache lock poisoned");
        (inner.hits, inner.misses)
    }

    fn evict_oldest(inner: &mut CacheInner) {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            inner.entries.remove(&key);
        }
    }

    /// Cheap content hash: dimensions and color type plus a row-subsampled
    /// byte sample (every `rows/10`-th row, at most 1000 bytes per row).
    fn content_hash(image: &DynamicImage) -> u64 {
        let mut hasher = DefaultHasher::new();
        image.width().hash(&mut hasher);
        image.height().hash(&mut hasher);
        (image.color() as u8).hash(&mut hasher);

        let bytes = image.as_bytes();
        let height = image.height().max(1) as usize;
        let row_bytes = bytes.len() / height;
        if row_bytes > 0 {
            let step = (height / 10).max(1);
            for row in (0..height).step_by(step) {
                let start = row * row_bytes;
                let end = (start + row_bytes.min(1000)).min(bytes.len());
                bytes[start..end].hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gray(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([v])))
    }

    #[test]
    fn second_lookup_hits() {
        let cache = PreprocessCache::new(4);
        let image = gray(32, 32, 100);
        let mut calls = 0;

        for _ in 0..2 {
            let result = cache.get_or_compute(&image, "blur", |img| {
                calls += 1;
                img.clone()
            });
            assert_eq!(result.width(), 32);
        }

        assert_eq!(calls, 1);
        assert_eq!(cache.counters(), (1, 1));
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn changed_content_invalidates_entry() {
        let cache = PreprocessCache::new(4);
        let mut calls = 0;

        cache.get_or_compute(&gray(32, 32, 100), "blur", |img| {
            calls += 1;
            img.clone()
        });
        cache.get_or_compute(&gray(32, 32, 101), "blur", |img| {
            calls += 1;
            img.clone()
        });

        assert_eq!(calls, 2);
        assert_eq!(cache.counters(), (0, 2));
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = PreprocessCache::new(2);
        let image = gray(16, 16, 50);

        cache.get_or_compute(&image, "a", |img| img.clone());
        cache.get_or_compute(&image, "b", |img| img.clone());
        // Touch "a" so "b" becomes the LRU entry.
        cache.get_or_compute(&image, "a", |img| img.clone());
        cache.get_or_compute(&image, "c", |img| img.clone());

        // "a" was touched most recently before the eviction, so it survives.
        let mut a_recomputed = false;
        cache.get_or_compute(&image, "a", |img| {
            a_recomputed = true;
            img.clone()
        });
        assert!(!a_recomputed, "recently used entry should survive");

        let mut b_recomputed = false;
        cache.get_or_compute(&image, "b", |img| {
            b_recomputed = true;
            img.clone()
        });
        assert!(b_recomputed, "LRU entry should have been evicted");
    }

    #[test]
    fn clear_resets_counters() {
        let cache = PreprocessCache::new(4);
        let image = gray(8, 8, 10);
        cache.get_or_compute(&image, "x", |img| img.clone());
        cache.get_or_compute(&image, "x", |img| img.clone());
        cache.clear();
        assert_eq!(cache.counters(), (0, 0));
        assert_eq!(cache.hit_rate(), 0.0);
    }
}
