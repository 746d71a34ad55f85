use parking_lot::Mutex;
use tracing::{debug, trace};

use super::frame::Frame;
use super::store::{FixMode, FixedPage, PageStore, ReplacementPriority};
use crate::types::page::DEFAULT_PAGE_SIZE;
use crate::types::{AreaError, PageId, Result};

/// Counters describing the traffic seen by a [`MemPager`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemPagerStats {
    /// Successful fixes.
    pub fixes: u64,
    /// Fixes that created or re-zeroed a page.
    pub allocations: u64,
    /// Unfixes that kept their changes.
    pub dirty_unfixes: u64,
    /// Writable unfixes whose changes were rolled back.
    pub rollbacks: u64,
    /// Fixes rejected by fault injection.
    pub injected_failures: u64,
    /// Calls to [`PageStore::reclaim`].
    pub reclaims: u64,
    /// Calls to [`PageStore::truncate`].
    pub truncations: u64,
}

struct MemInner {
    frames: Vec<Frame>,
    stats: MemPagerStats,
    fail_fixes: u32,
    reclaimable: bool,
}

/// In-memory [`PageStore`] with before-image rollback and fault injection.
///
/// Pages are created by `Allocate` fixes; fixing a page past the end of the
/// store in any other mode fails.
pub struct MemPager {
    page_size: u32,
    inner: Mutex<MemInner>,
}

impl MemPager {
    /// Creates an empty store with `page_size`-byte pages.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            inner: Mutex::new(MemInner {
                frames: Vec::new(),
                stats: MemPagerStats::default(),
                fail_fixes: 0,
                reclaimable: true,
            }),
        }
    }

    /// Makes the next `count` fixes fail with [`AreaError::MemoryExhausted`].
    pub fn fail_next_fixes(&self, count: u32) {
        self.inner.lock().fail_fixes = count;
    }

    /// Controls the value returned by [`PageStore::reclaim`].
    pub fn set_reclaimable(&self, reclaimable: bool) {
        self.inner.lock().reclaimable = reclaimable;
    }

    /// Returns a snapshot of the traffic counters.
    pub fn stats(&self) -> MemPagerStats {
        self.inner.lock().stats
    }

    /// Number of pages currently fixed at least once.
    pub fn pinned_pages(&self) -> usize {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|frame| frame.pin_count > 0)
            .count()
    }

    /// Copies the current bytes of page `id`.
    pub fn page_image(&self, id: PageId) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        let frame = frame_at(&inner.frames, id)?;
        let image = frame.buf.read().to_vec();
        Ok(image)
    }

    /// Edits page `id` in place, bypassing fix/unfix bookkeeping.
    pub fn with_page_mut<R>(&self, id: PageId, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let inner = self.inner.lock();
        let frame = frame_at(&inner.frames, id)?;
        let mut guard = frame.buf.write();
        Ok(f(&mut guard[..]))
    }
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

fn frame_at(frames: &[Frame], id: PageId) -> Result<&Frame> {
    usize::try_from(id.0)
        .ok()
        .and_then(|idx| frames.get(idx))
        .ok_or(AreaError::BadArgument("page beyond end of store"))
}

impl PageStore for MemPager {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> Result<u64> {
        Ok(self.inner.lock().frames.len() as u64)
    }

    fn fix(&self, id: PageId, mode: FixMode, _priority: ReplacementPriority) -> Result<FixedPage> {
        let mut inner = self.inner.lock();
        if inner.fail_fixes > 0 {
            inner.fail_fixes -= 1;
            inner.stats.injected_failures += 1;
            trace!(page = id.0, "mem_pager.fix.injected_failure");
            return Err(AreaError::MemoryExhausted);
        }
        let idx = usize::try_from(id.0).map_err(|_| AreaError::BadArgument("page id overflow"))?;
        if idx >= inner.frames.len() {
            if !mode.is_allocate() {
                return Err(AreaError::BadArgument("page beyond end of store"));
            }
            let page_size = self.page_size as usize;
            inner.frames.resize_with(idx + 1, || Frame::new(page_size));
            debug!(page = id.0, pages = idx + 1, "mem_pager.extend");
        }
        let frame = &mut inner.frames[idx];
        if mode.is_writable() {
            frame.begin_write();
        }
        if mode.is_allocate() {
            frame.zero();
        }
        frame.pin_count += 1;
        let buf = frame.buf.clone();
        inner.stats.fixes += 1;
        if mode.is_allocate() {
            inner.stats.allocations += 1;
        }
        Ok(FixedPage::new(id, mode, buf))
    }

    fn unfix(&self, page: FixedPage, dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = usize::try_from(page.id().0)
            .map_err(|_| AreaError::BadArgument("page id overflow"))?;
        let frame = inner
            .frames
            .get_mut(idx)
            .ok_or(AreaError::Unexpected("unfix of page missing from store"))?;
        if frame.pin_count == 0 {
            return Err(AreaError::Unexpected("unfix of page that is not fixed"));
        }
        frame.pin_count -= 1;
        if page.mode().is_writable() {
            frame.end_write(dirty);
            if dirty {
                inner.stats.dirty_unfixes += 1;
            } else {
                inner.stats.rollbacks += 1;
            }
        }
        Ok(())
    }

    fn truncate(&self, page_count: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let keep = usize::try_from(page_count)
            .map_err(|_| AreaError::BadArgument("page count overflow"))?;
        if inner.frames.iter().skip(keep).any(|frame| frame.pin_count > 0) {
            return Err(AreaError::Unexpected("truncate would drop a fixed page"));
        }
        inner.frames.truncate(keep);
        inner.stats.truncations += 1;
        debug!(pages = keep, "mem_pager.truncate");
        Ok(())
    }

    fn reclaim(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.stats.reclaims += 1;
        inner.reclaimable
    }
}
