use std::sync::Arc;

use tracing::debug;

use crate::admin::Progress;
use crate::primitives::pager::{FixMode, PageStore, ReplacementPriority};
use crate::storage::cache::{Fixer, PageCache, PageHandle};
use crate::storage::layout::FileLayout;
use crate::storage::metrics::AreaMetrics;
use crate::storage::tree::{node, TreeGeometry, ROOT};
use crate::types::{AreaError, PageId, Result};

/// Page access shared by the file and its free-space tree.
///
/// Leaves and summary pages are cached separately; the last managed page id
/// is read from the root header once and cached until the next detach.
pub(crate) struct Pages {
    fixer: Fixer,
    layout: FileLayout,
    leaves: PageCache,
    nodes: PageCache,
    last: Option<PageId>,
}

impl Pages {
    pub fn new(
        store: Arc<dyn PageStore>,
        layout: FileLayout,
        metrics: Arc<dyn AreaMetrics>,
        max_cached_read_only: usize,
    ) -> Self {
        let page_len = layout.page_len();
        Self {
            fixer: Fixer::new(store, metrics),
            layout,
            leaves: PageCache::new("leaves", page_len, max_cached_read_only),
            nodes: PageCache::new("nodes", page_len, max_cached_read_only),
            last: None,
        }
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    pub fn geometry(&self) -> &TreeGeometry {
        self.layout.geometry()
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        self.fixer.store()
    }

    pub fn metrics(&self) -> &Arc<dyn AreaMetrics> {
        self.fixer.metrics()
    }

    /// Attaches leaf `id`.
    pub fn leaf(&mut self, id: PageId, mode: FixMode) -> Result<PageHandle> {
        self.leaves
            .attach(&self.fixer, id, mode, ReplacementPriority::Middle, None)
    }

    /// Attaches leaf `id` through the store's verification entry point.
    pub fn leaf_for_verify(
        &mut self,
        id: PageId,
        mode: FixMode,
        progress: &mut Progress,
    ) -> Result<PageHandle> {
        self.leaves
            .attach(&self.fixer, id, mode, ReplacementPriority::Low, Some(progress))
    }

    /// Attaches root or node page `id`.
    pub fn node(&mut self, id: PageId, mode: FixMode) -> Result<PageHandle> {
        self.nodes
            .attach(&self.fixer, id, mode, ReplacementPriority::High, None)
    }

    /// Last leaf managed by the file.
    pub fn last_page_id(&mut self) -> Result<PageId> {
        if let Some(last) = self.last {
            return Ok(last);
        }
        let root = self.node(ROOT, FixMode::ReadOnly)?;
        let managed = root.with_read(node::managed_pages)?;
        let last = managed
            .checked_sub(1)
            .map(PageId)
            .ok_or(AreaError::Corruption("root header records no pages"))?;
        self.last = Some(last);
        Ok(last)
    }

    /// Fails when the root header was stamped with another page length or
    /// alignment than the open layout.
    pub fn check_stamped_layout(&mut self) -> Result<()> {
        let root = self.node(ROOT, FixMode::ReadOnly)?;
        let (page_len, alignment) = root.with_read(node::stamped_layout)?;
        if page_len != self.layout.page_len() {
            return Err(AreaError::BadArgument("page size differs from the file's"));
        }
        if alignment != self.layout.alignment() {
            return Err(AreaError::BadArgument("alignment differs from the file's"));
        }
        Ok(())
    }

    /// Records `last` as the last managed leaf in the root header.
    pub fn set_last_page_id(&mut self, last: PageId) -> Result<()> {
        let root = self.node(ROOT, FixMode::DiscardableWrite)?;
        let (page_len, alignment) = (self.layout.page_len(), self.layout.alignment());
        root.with_write(|bytes| node::write_header(bytes, page_len, alignment, last.0 + 1))??;
        self.last = Some(last);
        debug!(last = last.0, "area_file.last_page");
        Ok(())
    }

    /// Unfixes every cached page with id `first` or above, dropping changes.
    pub fn discard_from(&mut self, first: PageId) -> Result<()> {
        self.leaves.discard_from(&self.fixer, first)?;
        self.nodes.discard_from(&self.fixer, first)
    }

    /// Unfixes every page keeping changes of the dirty ones.
    pub fn detach_all(&mut self) -> Result<()> {
        self.last = None;
        let leaves = self.leaves.detach_all(&self.fixer);
        let nodes = self.nodes.detach_all(&self.fixer);
        leaves.and(nodes)
    }

    /// Unfixes every page dropping all changes.
    pub fn recover_all(&mut self) -> Result<()> {
        self.last = None;
        let leaves = self.leaves.recover_all(&self.fixer);
        let nodes = self.nodes.recover_all(&self.fixer);
        leaves.and(nodes)
    }
}
