use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tracing::{trace, warn};

use crate::admin::Progress;
use crate::primitives::pager::{FixMode, FixedPage, PageBuf, PageStore, ReplacementPriority};
use crate::storage::metrics::AreaMetrics;
use crate::types::{AreaError, PageId, Result};

/// Fixes pages through the store, retrying once after the store reclaims memory.
#[derive(Clone)]
pub(crate) struct Fixer {
    store: Arc<dyn PageStore>,
    metrics: Arc<dyn AreaMetrics>,
}

impl Fixer {
    pub fn new(store: Arc<dyn PageStore>, metrics: Arc<dyn AreaMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<dyn AreaMetrics> {
        &self.metrics
    }

    fn fix(
        &self,
        id: PageId,
        mode: FixMode,
        priority: ReplacementPriority,
        mut progress: Option<&mut Progress>,
    ) -> Result<FixedPage> {
        match self.fix_once(id, mode, priority, progress.as_deref_mut()) {
            Err(AreaError::MemoryExhausted) => {
                if !self.store.reclaim() {
                    return Err(AreaError::MemoryExhausted);
                }
                warn!(page = id.0, ?mode, "page_cache.fix.retry");
                self.metrics.fix_retried();
                self.fix_once(id, mode, priority, progress)
            }
            other => other,
        }
    }

    fn fix_once(
        &self,
        id: PageId,
        mode: FixMode,
        priority: ReplacementPriority,
        progress: Option<&mut Progress>,
    ) -> Result<FixedPage> {
        match progress {
            Some(progress) => self.store.verify(id, mode, progress),
            None => self.store.fix(id, mode, priority),
        }
    }

    pub fn unfix(&self, page: FixedPage, dirty: bool) -> Result<()> {
        self.store.unfix(page, dirty)
    }
}

/// Dirty flag shared between a cached page and the handles lent out for it.
#[derive(Debug, Default)]
pub(crate) struct PagePin {
    dirty: AtomicBool,
}

/// Borrowed view of a page held by a [`PageCache`].
///
/// Handles stay usable until the cache is detached or recovered.
#[derive(Clone, Debug)]
pub struct PageHandle {
    id: PageId,
    mode: FixMode,
    len: usize,
    buf: PageBuf,
    pin: Arc<PagePin>,
}

impl PageHandle {
    /// Page identifier.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Mode the page is fixed with.
    pub fn mode(&self) -> FixMode {
        self.mode
    }

    /// Returns `true` when the page may be modified.
    pub fn is_writable(&self) -> bool {
        self.mode.is_writable()
    }

    /// Runs `f` over the managed bytes of the page.
    pub fn with_read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.buf.read();
        let len = self.len.min(guard.len());
        f(&guard[..len])
    }

    /// Runs `f` over the managed bytes of the page and marks it dirty.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if !self.is_writable() {
            return Err(AreaError::Unexpected("page fixed read-only"));
        }
        let mut guard = self.buf.write();
        let len = self.len.min(guard.len());
        let out = f(&mut guard[..len]);
        self.pin.dirty.store(true, Ordering::Release);
        Ok(out)
    }
}

struct CachedPage {
    page: FixedPage,
    pin: Arc<PagePin>,
}

impl CachedPage {
    fn handle(&self, len: usize) -> PageHandle {
        PageHandle {
            id: self.page.id(),
            mode: self.page.mode(),
            len,
            buf: self.page.buf().clone(),
            pin: self.pin.clone(),
        }
    }

    fn is_dirty(&self) -> bool {
        self.pin.dirty.load(Ordering::Acquire)
    }

    fn is_idle_read_only(&self) -> bool {
        !self.page.mode().is_writable() && Arc::strong_count(&self.pin) == 1
    }
}

/// Pages fixed on behalf of one kind of caller (leaves or nodes).
///
/// Writable pages stay fixed until the cache is detached or recovered.
/// Read-only pages nobody references are released oldest first once more
/// than `max_idle_read_only` accumulate.
pub(crate) struct PageCache {
    name: &'static str,
    page_len: usize,
    max_idle_read_only: usize,
    pages: LruCache<PageId, CachedPage>,
}

impl PageCache {
    pub fn new(name: &'static str, page_len: usize, max_idle_read_only: usize) -> Self {
        Self {
            name,
            page_len,
            max_idle_read_only,
            pages: LruCache::unbounded(),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns a handle on `id` fixed at least as strongly as `mode`.
    pub fn attach(
        &mut self,
        fixer: &Fixer,
        id: PageId,
        mode: FixMode,
        priority: ReplacementPriority,
        progress: Option<&mut Progress>,
    ) -> Result<PageHandle> {
        if let Some(cached) = self.pages.get(&id) {
            let upgrade = mode.is_writable() && !cached.page.mode().is_writable();
            if !upgrade && !mode.is_allocate() {
                fixer.metrics().cache_hit();
                return Ok(cached.handle(self.page_len));
            }
            if let Some(stale) = self.pages.pop(&id) {
                let dirty = stale.is_dirty();
                fixer.unfix(stale.page, dirty)?;
            }
        } else {
            self.evict_idle(fixer)?;
        }
        let page = fixer.fix(id, mode, priority, progress)?;
        let cached = CachedPage {
            page,
            pin: Arc::new(PagePin::default()),
        };
        let handle = cached.handle(self.page_len);
        self.pages.put(id, cached);
        trace!(cache = self.name, page = id.0, ?mode, "page_cache.attach");
        Ok(handle)
    }

    fn evict_idle(&mut self, fixer: &Fixer) -> Result<()> {
        loop {
            let mut idle = self.pages.iter().rev().filter(|(_, c)| c.is_idle_read_only());
            let Some((&oldest, _)) = idle.next() else {
                return Ok(());
            };
            if 1 + idle.count() < self.max_idle_read_only.max(1) {
                return Ok(());
            }
            if let Some(evicted) = self.pages.pop(&oldest) {
                fixer.unfix(evicted.page, false)?;
                fixer.metrics().cache_evicted();
                trace!(cache = self.name, page = oldest.0, "page_cache.evict");
            }
        }
    }

    /// Unfixes every page with id `first` or above without keeping changes.
    pub fn discard_from(&mut self, fixer: &Fixer, first: PageId) -> Result<()> {
        let doomed: Vec<PageId> = self
            .pages
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id >= first)
            .collect();
        for id in doomed {
            if let Some(cached) = self.pages.pop(&id) {
                fixer.unfix(cached.page, false)?;
            }
        }
        Ok(())
    }

    /// Unfixes every page, keeping the changes of dirty ones.
    pub fn detach_all(&mut self, fixer: &Fixer) -> Result<()> {
        self.release_all(fixer, true)
    }

    /// Unfixes every page, dropping all changes.
    pub fn recover_all(&mut self, fixer: &Fixer) -> Result<()> {
        self.release_all(fixer, false)
    }

    fn release_all(&mut self, fixer: &Fixer, keep: bool) -> Result<()> {
        let mut first_err = None;
        while let Some((_, cached)) = self.pages.pop_lru() {
            let dirty = keep && cached.is_dirty();
            if let Err(err) = fixer.unfix(cached.page, dirty) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
