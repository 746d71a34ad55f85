use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::admin::Progress;
use crate::types::{AreaError, PageId, Result};

/// Shared page buffer lent out by a page store.
pub type PageBuf = Arc<RwLock<Box<[u8]>>>;

/// How a page is fixed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FixMode {
    /// Read access only.
    ReadOnly,
    /// Read/write access; changes are kept when unfixed dirty.
    Write,
    /// Read/write access; changes are dropped when unfixed clean.
    DiscardableWrite,
    /// Fresh zero-filled page, extending the store when needed.
    Allocate,
    /// Fresh zero-filled page whose contents are dropped when unfixed clean.
    DiscardableAllocate,
}

impl FixMode {
    /// Returns `true` when the page may be modified.
    pub const fn is_writable(self) -> bool {
        !matches!(self, FixMode::ReadOnly)
    }

    /// Returns `true` when the fix creates the page.
    pub const fn is_allocate(self) -> bool {
        matches!(self, FixMode::Allocate | FixMode::DiscardableAllocate)
    }
}

/// Hint passed to the store about how long a page should stay buffered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ReplacementPriority {
    /// Evict early.
    Low,
    /// Default retention.
    Middle,
    /// Keep as long as possible.
    High,
}

/// A page fixed in a store. Must be returned through [`PageStore::unfix`].
#[derive(Debug)]
pub struct FixedPage {
    id: PageId,
    mode: FixMode,
    buf: PageBuf,
}

impl FixedPage {
    /// Wraps a buffer fixed under `mode`.
    pub fn new(id: PageId, mode: FixMode, buf: PageBuf) -> Self {
        Self { id, mode, buf }
    }

    /// Page identifier.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Mode the page was fixed with.
    pub fn mode(&self) -> FixMode {
        self.mode
    }

    /// Shared handle to the page bytes.
    pub fn buf(&self) -> &PageBuf {
        &self.buf
    }

    /// Locks the page bytes for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Locks the page bytes for writing.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Box<[u8]>>> {
        if !self.mode.is_writable() {
            return Err(AreaError::Unexpected("page fixed read-only"));
        }
        Ok(self.buf.write())
    }
}

/// Fix/unfix contract consumed from the external pager.
///
/// Implementations own buffering and durability; callers only borrow page
/// memory between `fix` and `unfix`.
pub trait PageStore: 'static {
    /// Size of every page buffer in bytes.
    fn page_size(&self) -> u32;

    /// Number of pages currently present in the store.
    fn page_count(&self) -> Result<u64>;

    /// Fixes a page.
    fn fix(&self, id: PageId, mode: FixMode, priority: ReplacementPriority) -> Result<FixedPage>;

    /// Fixes a page on behalf of a verification pass.
    ///
    /// Stores that keep their own consistency bookkeeping record findings
    /// into `progress`.
    fn verify(&self, id: PageId, mode: FixMode, progress: &mut Progress) -> Result<FixedPage> {
        let _ = progress;
        self.fix(id, mode, ReplacementPriority::Low)
    }

    /// Releases a fixed page. Clean writable pages are rolled back.
    fn unfix(&self, page: FixedPage, dirty: bool) -> Result<()>;

    /// Shrinks the store to `page_count` pages.
    fn truncate(&self, page_count: u64) -> Result<()>;

    /// Attempts to free memory after a [`AreaError::MemoryExhausted`] fix.
    ///
    /// Returns `false` when nothing could be reclaimed.
    fn reclaim(&self) -> bool {
        false
    }
}
