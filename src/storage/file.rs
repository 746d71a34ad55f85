use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::admin::{Progress, Treatment};
use crate::primitives::pager::{FixMode, PageStore};
use crate::storage::area::Area;
use crate::storage::cache::PageHandle;
use crate::storage::layout::FileLayout;
use crate::storage::leaf::Leaf;
use crate::storage::metrics::{default_metrics, AreaMetrics};
use crate::storage::options::AreaFileOptions;
use crate::storage::pages::Pages;
use crate::storage::tree::FreeSpaceTree;
use crate::types::{AreaError, AreaId, PageId, Result};

/// Variable-length areas carved out of the pages of one store.
///
/// Pages stay fixed between operations. [`AreaFile::detach_all_areas`] makes
/// every change durable in the store; [`AreaFile::recover_all_areas`] drops
/// every change since the last detach. Dropping the file recovers.
pub struct AreaFile {
    pages: Pages,
    tree: FreeSpaceTree,
    batch_insert: bool,
}

impl AreaFile {
    /// Lays out a new file on an empty store.
    pub fn create(store: Arc<dyn PageStore>, options: AreaFileOptions) -> Result<Self> {
        if store.page_count()? != 0 {
            return Err(AreaError::BadArgument("store already holds pages"));
        }
        let mut file = Self::with_store(store, options)?;
        file.tree.initialize(&mut file.pages)?;
        file.pages.detach_all()?;
        info!(
            page_len = file.pages.layout().page_len(),
            alignment = file.pages.layout().alignment(),
            "area_file.create"
        );
        Ok(file)
    }

    /// Opens a file previously laid out by [`AreaFile::create`].
    pub fn open(store: Arc<dyn PageStore>, options: AreaFileOptions) -> Result<Self> {
        let mut file = Self::with_store(store, options)?;
        file.pages.check_stamped_layout()?;
        let last = file.pages.last_page_id()?;
        let present = file.pages.store().page_count()?;
        if present <= last.0 || !file.pages.geometry().is_leaf(last) {
            return Err(AreaError::Corruption("root header disagrees with store"));
        }
        file.pages.detach_all()?;
        info!(last = last.0, "area_file.open");
        Ok(file)
    }

    fn with_store(store: Arc<dyn PageStore>, options: AreaFileOptions) -> Result<Self> {
        let layout = FileLayout::new(store.page_size(), &options)?;
        let metrics: Arc<dyn AreaMetrics> = options.metrics.clone().unwrap_or_else(default_metrics);
        Ok(Self {
            pages: Pages::new(store, layout, metrics, options.max_cached_read_only),
            tree: FreeSpaceTree::new(),
            batch_insert: options.batch_insert,
        })
    }

    /// Page size, alignment, and tree shape of the file.
    pub fn layout(&self) -> &FileLayout {
        self.pages.layout()
    }

    /// Largest area [`AreaFile::allocate_area`] accepts.
    pub fn max_storable_area_size(&self) -> u32 {
        self.pages.layout().max_storable()
    }

    /// Bytes of the store occupied by the file.
    pub fn used_size(&mut self) -> Result<u64> {
        let last = self.pages.last_page_id()?;
        Ok((last.0 + 1) * self.pages.layout().page_len() as u64)
    }

    /// Last leaf page of the file.
    pub fn last_page_id(&mut self) -> Result<PageId> {
        self.pages.last_page_id()
    }

    fn aligned(&self, size: u32) -> Result<u32> {
        if size == 0 || size > self.max_storable_area_size() {
            return Err(AreaError::BadArgument("area size out of range"));
        }
        self.pages
            .layout()
            .round_up(size)
            .ok_or(AreaError::BadArgument("area size out of range"))
    }

    fn leaf(&mut self, page: PageId, mode: FixMode, progress: Option<&mut Progress>) -> Result<PageHandle> {
        if !self.pages.geometry().is_leaf(page) {
            return Err(AreaError::BadArgument("page is not a leaf"));
        }
        if progress.is_none() && page > self.pages.last_page_id()? {
            return Err(AreaError::BadArgument("page beyond last leaf"));
        }
        self.tree.attach_leaf(&mut self.pages, page, mode, progress)
    }

    /// Allocates a zero-filled area of at least `size` bytes.
    pub fn allocate_area(&mut self, size: u32) -> Result<Area> {
        let rounded = self.aligned(size)?;
        let leaf = self
            .tree
            .get_leaf(&mut self.pages, rounded, self.batch_insert)?;
        let key = leaf.with_write(|bytes| Leaf::new(bytes).allocate(rounded))??;
        let id = AreaId::new(leaf.id(), key);
        self.pages.metrics().area_allocated(rounded);
        debug!(area = %id, size = rounded, "area_file.allocate");
        Ok(Area::new(id, leaf))
    }

    /// Frees area `id`.
    ///
    /// With `progress`, the call is part of a verification pass and keeps
    /// its bookkeeping current.
    pub fn free_area(&mut self, id: AreaId, mut progress: Option<&mut Progress>) -> Result<()> {
        let leaf = self.leaf(id.page, FixMode::DiscardableWrite, progress.as_deref_mut())?;
        let free = self.tree.release_area(&mut self.pages, &leaf, id.key, progress)?;
        self.pages.metrics().area_freed();
        debug!(area = %id, free, "area_file.free");
        Ok(())
    }

    /// Resizes area `id` in place.
    ///
    /// Returns `false`, leaving the area untouched, when its page lacks room.
    pub fn change_area_size(
        &mut self,
        id: AreaId,
        size: u32,
        mut progress: Option<&mut Progress>,
    ) -> Result<bool> {
        let rounded = self.aligned(size)?;
        let leaf = self.leaf(id.page, FixMode::DiscardableWrite, progress.as_deref_mut())?;
        let before = leaf.with_read(|bytes| Leaf::new(bytes).free_size(true))?;
        let resized = leaf.with_write(|bytes| Leaf::new(bytes).resize(id.key, size, rounded))??;
        self.pages.metrics().area_resized(resized);
        if !resized {
            debug!(area = %id, size = rounded, "area_file.resize.no_room");
            return Ok(false);
        }
        let after = leaf.with_read(|bytes| Leaf::new(bytes).free_size(true))?;
        if after != before {
            self.tree.update(&mut self.pages, id.page, after, None)?;
        }
        if let Some(progress) = progress {
            self.tree.notify_free_space_size(id.page, after, progress)?;
        }
        Ok(true)
    }

    /// Attaches area `id` under `mode`.
    pub fn attach_area(&mut self, id: AreaId, mode: FixMode) -> Result<Area> {
        let leaf = self.leaf(id.page, mode, None)?;
        let known = leaf.with_read(|bytes| Leaf::new(bytes).find(id.key))?;
        if known.is_none() {
            return Err(AreaError::BadArgument("area is not allocated"));
        }
        Ok(Area::new(id, leaf))
    }

    /// Attaches area `id` on behalf of a verification pass and claims it.
    pub fn verify_area(&mut self, id: AreaId, mode: FixMode, progress: &mut Progress) -> Result<Area> {
        let leaf = self.leaf(id.page, mode, Some(&mut *progress))?;
        self.tree.notify_use_area(id, progress)?;
        Ok(Area::new(id, leaf))
    }

    /// Unfixes every page, keeping the changes made since the last detach.
    pub fn detach_all_areas(&mut self) -> Result<()> {
        self.pages.detach_all()
    }

    /// Unfixes every page, dropping the changes made since the last detach.
    pub fn recover_all_areas(&mut self) -> Result<()> {
        self.pages.recover_all()
    }

    /// Page-granular detach is not offered; use [`AreaFile::detach_all_areas`].
    pub fn detach_page_all(&mut self) -> Result<()> {
        Err(AreaError::NotSupported("detach_page_all"))
    }

    /// Page-granular recovery is not offered; use [`AreaFile::recover_all_areas`].
    pub fn recover_page_all(&mut self) -> Result<()> {
        Err(AreaError::NotSupported("recover_page_all"))
    }

    /// Returns trailing empty leaves to the store.
    ///
    /// Returns `true` when the last leaf was empty. Shrinking the store cannot
    /// be recovered, so every page is detached afterwards and the root header
    /// stays in step with the store.
    pub fn truncate(&mut self) -> Result<bool> {
        let shrunk = self.tree.truncate(&mut self.pages)?;
        if shrunk {
            self.pages.detach_all()?;
        }
        Ok(shrunk)
    }

    /// Allocating free size of leaf `page`.
    pub fn page_free_size(&mut self, page: PageId) -> Result<u32> {
        let leaf = self.leaf(page, FixMode::ReadOnly, None)?;
        leaf.with_read(|bytes| Leaf::new(bytes).free_size(true))
    }

    /// Free size the tree records for leaf `page`; `None` for the last leaf.
    pub fn parent_free_size(&mut self, page: PageId) -> Result<Option<u32>> {
        self.tree.parent_free_size(&mut self.pages, page)
    }

    /// Starts a verification pass.
    pub fn begin_verification(&mut self, treatment: Treatment) -> Progress {
        self.tree.clear_verify_map();
        debug!(?treatment, "area_file.verify.begin");
        Progress::new(treatment)
    }

    /// Checks every leaf and summary the file holds.
    ///
    /// Areas nobody claimed through [`AreaFile::verify_area`] before this call
    /// are reported, or freed under [`Treatment::Correct`].
    pub fn verify_all_pages(&mut self, progress: &mut Progress) -> Result<()> {
        self.tree.verify(&mut self.pages, progress)
    }

    /// Ends a verification pass, detaching every page.
    pub fn end_verification(&mut self) -> Result<()> {
        self.tree.clear_verify_map();
        debug!("area_file.verify.end");
        self.pages.detach_all()
    }
}

impl Drop for AreaFile {
    fn drop(&mut self) {
        if let Err(err) = self.pages.recover_all() {
            warn!(error = %err, "area_file.drop.recover_failed");
        }
    }
}
