use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking allocator operations.
///
/// Implementations receive one call per completed operation and may be
/// shared across files.
pub trait AreaMetrics: Send + Sync {
    /// Records an allocated area of `size` aligned bytes.
    fn area_allocated(&self, size: u32);

    /// Records a freed area.
    fn area_freed(&self);

    /// Records a resize attempt and whether it fit in place.
    fn area_resized(&self, in_place: bool);

    /// Records a leaf page appended to the file.
    fn leaf_appended(&self);

    /// Records `pages` pages returned to the store by truncation.
    fn pages_truncated(&self, pages: u64);

    /// Records a fix retried after the store reclaimed memory.
    fn fix_retried(&self);

    /// Records an attach served from a cache without fixing.
    fn cache_hit(&self);

    /// Records a read-only page released from a cache.
    fn cache_evicted(&self);
}

/// A no-op implementation of [`AreaMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl AreaMetrics for NoopMetrics {
    fn area_allocated(&self, _size: u32) {}
    fn area_freed(&self) {}
    fn area_resized(&self, _in_place: bool) {}
    fn leaf_appended(&self) {}
    fn pages_truncated(&self, _pages: u64) {}
    fn fix_retried(&self) {}
    fn cache_hit(&self) {}
    fn cache_evicted(&self) {}
}

/// A thread-safe counter-based implementation of [`AreaMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of areas allocated.
    pub areas_allocated: AtomicU64,

    /// Total aligned bytes handed out by allocations.
    pub bytes_allocated: AtomicU64,

    /// Number of areas freed.
    pub areas_freed: AtomicU64,

    /// Number of resizes that fit in place.
    pub resizes_in_place: AtomicU64,

    /// Number of resizes that did not fit.
    pub resizes_refused: AtomicU64,

    /// Number of leaf pages appended.
    pub leaves_appended: AtomicU64,

    /// Number of pages returned to the store.
    pub pages_truncated: AtomicU64,

    /// Number of fixes retried after reclaiming memory.
    pub fix_retries: AtomicU64,

    /// Number of attaches served from the caches.
    pub cache_hits: AtomicU64,

    /// Number of read-only pages released from the caches.
    pub cache_evictions: AtomicU64,
}

/// Plain copy of the counters held by [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct CounterSnapshot {
    /// Number of areas allocated.
    pub areas_allocated: u64,
    /// Total aligned bytes handed out by allocations.
    pub bytes_allocated: u64,
    /// Number of areas freed.
    pub areas_freed: u64,
    /// Number of resizes that fit in place.
    pub resizes_in_place: u64,
    /// Number of resizes that did not fit.
    pub resizes_refused: u64,
    /// Number of leaf pages appended.
    pub leaves_appended: u64,
    /// Number of pages returned to the store.
    pub pages_truncated: u64,
    /// Number of fixes retried after reclaiming memory.
    pub fix_retries: u64,
    /// Number of attaches served from the caches.
    pub cache_hits: u64,
    /// Number of read-only pages released from the caches.
    pub cache_evictions: u64,
}

impl CounterMetrics {
    /// Reads every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            areas_allocated: self.areas_allocated.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            areas_freed: self.areas_freed.load(Ordering::Relaxed),
            resizes_in_place: self.resizes_in_place.load(Ordering::Relaxed),
            resizes_refused: self.resizes_refused.load(Ordering::Relaxed),
            leaves_appended: self.leaves_appended.load(Ordering::Relaxed),
            pages_truncated: self.pages_truncated.load(Ordering::Relaxed),
            fix_retries: self.fix_retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
        }
    }
}

impl AreaMetrics for CounterMetrics {
    fn area_allocated(&self, size: u32) {
        self.areas_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated
            .fetch_add(u64::from(size), Ordering::Relaxed);
    }

    fn area_freed(&self) {
        self.areas_freed.fetch_add(1, Ordering::Relaxed);
    }

    fn area_resized(&self, in_place: bool) {
        if in_place {
            self.resizes_in_place.fetch_add(1, Ordering::Relaxed);
        } else {
            self.resizes_refused.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn leaf_appended(&self) {
        self.leaves_appended.fetch_add(1, Ordering::Relaxed);
    }

    fn pages_truncated(&self, pages: u64) {
        self.pages_truncated.fetch_add(pages, Ordering::Relaxed);
    }

    fn fix_retried(&self) {
        self.fix_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_evicted(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn AreaMetrics> {
    Arc::new(NoopMetrics)
}
