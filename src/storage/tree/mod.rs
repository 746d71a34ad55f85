//! Elastic free-space summary tree.
//!
//! Every leaf except the last is summarised by its allocating free size in
//! its parent node; every node entry holds the maximum of its child. The root
//! page stands in for the shallowest node the current leaf count needs, so a
//! small file only ever touches the root.

mod geometry;
pub(crate) mod node;
mod verify;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::admin::{Discrepancy, Progress};
use crate::primitives::pager::FixMode;
use crate::storage::cache::PageHandle;
use crate::storage::leaf::{self, Leaf};
use crate::storage::pages::Pages;
use crate::types::page::FILE_HDR_LEN;
use crate::types::{AreaError, AreaId, PageId, Result};

pub use geometry::{RootShape, TreeGeometry, LEAF_STEP, MIN_LEAF, ROOT};
use verify::VerifyMap;

/// Largest value seen below each step during a search, when it is known.
type Seconds = [Option<u32>; LEAF_STEP as usize];

/// A summary page being checked against its recomputed children.
struct NodeFrame {
    page: PageId,
    last_index: u64,
    next: u64,
    max: u32,
}

/// Free-space summary over the leaves of one file.
#[derive(Debug, Default)]
pub(crate) struct FreeSpaceTree {
    verify_map: VerifyMap,
}

fn leaf_free(handle: &PageHandle) -> Result<u32> {
    handle.with_read(|bytes| Leaf::new(bytes).free_size(true))
}

fn reset_node(pages: &mut Pages, id: PageId) -> Result<()> {
    pages
        .node(id, FixMode::DiscardableWrite)?
        .with_write(node::reset_entries)
}

fn copy_entries(from: &PageHandle, to: &PageHandle) -> Result<()> {
    let entries = from.with_read(|bytes| bytes.get(FILE_HDR_LEN..).map(<[u8]>::to_vec));
    let entries = entries.ok_or(AreaError::Corruption("summary page too short"))?;
    to.with_write(|bytes| bytes[FILE_HDR_LEN..].copy_from_slice(&entries))
}

impl FreeSpaceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays out a fresh file: root header, reserved node pages, first leaf.
    pub fn initialize(&mut self, pages: &mut Pages) -> Result<()> {
        for id in 0..MIN_LEAF.0 {
            pages
                .node(PageId(id), FixMode::Allocate)?
                .with_write(|bytes| bytes.fill(0))?;
        }
        pages.set_last_page_id(MIN_LEAF)?;
        let first = pages.leaf(MIN_LEAF, FixMode::Allocate)?;
        first.with_write(|bytes| Leaf::new(bytes).initialize())??;
        debug!(page_len = pages.layout().page_len(), "free_space_tree.initialize");
        Ok(())
    }

    fn shape(&self, pages: &mut Pages) -> Result<RootShape> {
        let last = pages.last_page_id()?;
        Ok(pages.geometry().root_shape(last))
    }

    /// Returns a writable leaf with at least `size` allocating free bytes.
    ///
    /// The tree is updated for the space the caller is about to take.
    pub fn get_leaf(&mut self, pages: &mut Pages, size: u32, batch: bool) -> Result<PageHandle> {
        let last = pages.last_page_id()?;
        let free = leaf_free(&pages.leaf(last, FixMode::ReadOnly)?)?;
        if free >= size {
            return pages.leaf(last, FixMode::DiscardableWrite);
        }
        if !batch && last > MIN_LEAF {
            if let Some(found) = self.attach_leaf_in_tree(pages, size)? {
                return Ok(found);
            }
        }

        let (new_last, nodes) = pages.geometry().next_leaf(last)?;
        for id in nodes {
            pages
                .node(id, FixMode::DiscardableAllocate)?
                .with_write(node::reset_entries)?;
        }
        pages.set_last_page_id(new_last)?;
        self.append(pages, last, new_last, free)?;
        let handle = pages.leaf(new_last, FixMode::DiscardableAllocate)?;
        handle.with_write(|bytes| Leaf::new(bytes).initialize())??;
        pages.metrics().leaf_appended();
        debug!(page = new_last.0, "free_space_tree.append_leaf");
        Ok(handle)
    }

    fn attach_leaf_in_tree(&mut self, pages: &mut Pages, size: u32) -> Result<Option<PageHandle>> {
        let last = pages.last_page_id()?;
        let geometry = *pages.geometry();
        let shape = geometry.root_shape(last);
        let mut seconds: Seconds = [None; LEAF_STEP as usize];
        let mut id = ROOT;
        while !geometry.is_leaf(id) {
            let page = pages.node(id, FixMode::ReadOnly)?;
            let last_index = geometry.last_index(id, last, shape);
            let index = if id == ROOT {
                match page.with_read(|bytes| node::best_fit_root(bytes, last_index, size))? {
                    Some(index) => index,
                    None => return Ok(None),
                }
            } else {
                let fit = page.with_read(|bytes| node::best_fit(bytes, last_index, size))?;
                seconds[geometry.step_of(id) as usize] = fit.second;
                fit.index
                    .ok_or(AreaError::Unexpected("summary promised room its children lack"))?
            };
            id = geometry.substantial_child(id, index, shape);
        }

        let handle = pages.leaf(id, FixMode::DiscardableWrite)?;
        let free = leaf_free(&handle)?;
        if free < size {
            return Err(AreaError::Unexpected("summary overstates leaf free size"));
        }
        let remaining = leaf::reserve_index_entry(free - size);
        self.update(pages, id, remaining, Some(&seconds))?;
        trace!(page = id.0, size, remaining, "free_space_tree.search.hit");
        Ok(Some(handle))
    }

    /// Records `free` as the free size of leaf `page` and propagates upward.
    ///
    /// Without `seconds`, propagation stops once a node's maximum is
    /// unchanged. With them, the maximum of each node is known from the
    /// search that chose the leaf.
    pub fn update(
        &mut self,
        pages: &mut Pages,
        page: PageId,
        free: u32,
        seconds: Option<&Seconds>,
    ) -> Result<()> {
        let last = pages.last_page_id()?;
        if page == last {
            return Ok(());
        }
        let geometry = *pages.geometry();
        let shape = geometry.root_shape(last);
        let mut child = page;
        let mut size = Some(free);
        while let Some(value) = size {
            let (parent, index) = geometry.substantial_parent(child, shape);
            let handle = pages.node(parent, FixMode::DiscardableWrite)?;
            let previous = handle.with_write(|bytes| -> Result<u32> {
                let previous = node::entry(bytes, index)?;
                node::set_entry(bytes, index, value)?;
                Ok(previous)
            })??;
            if parent == ROOT {
                break;
            }
            size = match seconds {
                Some(seconds) => seconds[geometry.step_of(parent) as usize].map(|s| s.max(value)),
                None => {
                    let last_index = geometry.last_index(parent, last, shape);
                    handle.with_read(|bytes| node::updated_max(bytes, last_index, index, previous))?
                }
            };
            child = parent;
        }
        Ok(())
    }

    /// Folds the previous last leaf into the tree after `last` was appended.
    fn append(&mut self, pages: &mut Pages, previous: PageId, last: PageId, free: u32) -> Result<()> {
        let geometry = *pages.geometry();
        let before = geometry.root_shape(previous);
        let after = geometry.root_shape(last);
        if before != after && before != RootShape::Empty {
            let root = pages.node(ROOT, FixMode::DiscardableWrite)?;
            let moved = pages.node(before.logical_root(), FixMode::DiscardableWrite)?;
            copy_entries(&root, &moved)?;
            let max = moved.with_read(|bytes| node::max(bytes, geometry.max_children() - 1))?;
            root.with_write(|bytes| -> Result<()> {
                node::reset_entries(bytes);
                node::set_entry(bytes, 0, max)
            })??;
            debug!(from = ?before, to = ?after, "free_space_tree.append.grow_root");
        }
        if free != 0 {
            self.update(pages, previous, free, None)?;
        }
        Ok(())
    }

    /// Drops the summaries of leaves after `first` once `last` shrank to it.
    fn decontrol(&mut self, pages: &mut Pages, first: PageId, last: PageId) -> Result<()> {
        let geometry = *pages.geometry();
        let before = geometry.root_shape(last);
        let after = geometry.root_shape(first);
        let root = pages.node(ROOT, FixMode::DiscardableWrite)?;
        if after == RootShape::Empty {
            root.with_write(node::reset_entries)?;
            for step in before.step() + 1..LEAF_STEP {
                reset_node(pages, PageId(u64::from(step)))?;
            }
            return Ok(());
        }
        if after.step() > before.step() {
            let source = pages.node(after.logical_root(), FixMode::DiscardableWrite)?;
            copy_entries(&source, &root)?;
            for step in before.step() + 1..=after.step() {
                reset_node(pages, PageId(u64::from(step)))?;
            }
            debug!(from = ?before, to = ?after, "free_space_tree.decontrol.shrink_root");
        }

        let mut child = geometry.previous_leaf(first);
        for id in child.0 + 1..first.0 {
            reset_node(pages, PageId(id))?;
        }
        let last_entry = geometry.max_children() - 1;
        let mut size = None;
        loop {
            let (parent, index) = geometry.substantial_parent(child, after);
            let handle = pages.node(parent, FixMode::DiscardableWrite)?;
            let max = handle.with_write(|bytes| -> Result<u32> {
                if let Some(size) = size {
                    node::set_entry(bytes, index, size)?;
                }
                node::clear_after(bytes, index + 1, last_entry)?;
                node::max(bytes, index)
            })??;
            if parent == ROOT {
                break;
            }
            size = Some(max);
            child = parent;
        }
        Ok(())
    }

    /// Last leaf before `last` whose summary shows an area, or [`MIN_LEAF`].
    fn non_empty_leaf(&mut self, pages: &mut Pages, last: PageId) -> Result<PageId> {
        let geometry = *pages.geometry();
        let shape = geometry.root_shape(last);
        let empty = leaf::max_storable(pages.layout().page_len());
        let mut id = last;
        while id > MIN_LEAF {
            id = geometry.previous_leaf(id);
            let (parent, index) = geometry.substantial_parent(id, shape);
            let handle = pages.node(parent, FixMode::ReadOnly)?;
            for i in (0..=index).rev() {
                if handle.with_read(|bytes| node::entry(bytes, i))? != empty {
                    return Ok(geometry.substantial_child(parent, i, shape));
                }
            }
            id = parent;
        }
        Ok(MIN_LEAF)
    }

    /// Releases trailing empty leaves back to the store.
    ///
    /// Returns `false` when nothing was released.
    pub fn truncate(&mut self, pages: &mut Pages) -> Result<bool> {
        let last = pages.last_page_id()?;
        if last == MIN_LEAF {
            return Ok(false);
        }
        let free = leaf_free(&pages.leaf(last, FixMode::ReadOnly)?)?;
        if free != leaf::max_storable(pages.layout().page_len()) {
            return Ok(false);
        }
        let new_last = self.non_empty_leaf(pages, last)?;
        self.decontrol(pages, new_last, last)?;
        pages.set_last_page_id(new_last)?;
        let keep = new_last.0 + 1;
        pages.discard_from(PageId(keep))?;
        pages
            .store()
            .truncate(keep)
            .map_err(|err| AreaError::FileManipulate(Box::new(err)))?;
        pages.metrics().pages_truncated(last.0 - new_last.0);
        debug!(from = last.0, to = new_last.0, "free_space_tree.truncate");
        Ok(true)
    }

    /// Summary entry describing leaf `page`, or `None` for an untracked leaf.
    pub fn parent_free_size(&mut self, pages: &mut Pages, page: PageId) -> Result<Option<u32>> {
        let last = pages.last_page_id()?;
        if page >= last || !pages.geometry().is_leaf(page) {
            return Ok(None);
        }
        let shape = self.shape(pages)?;
        let (parent, index) = pages.geometry().substantial_parent(page, shape);
        let handle = pages.node(parent, FixMode::ReadOnly)?;
        handle.with_read(|bytes| node::entry(bytes, index)).map(Some)
    }

    /// Attaches leaf `id`, registering it with the current verification pass.
    pub fn attach_leaf(
        &mut self,
        pages: &mut Pages,
        id: PageId,
        mode: FixMode,
        progress: Option<&mut Progress>,
    ) -> Result<PageHandle> {
        match progress {
            None => pages.leaf(id, mode),
            Some(progress) => {
                let handle = pages.leaf_for_verify(id, mode, progress)?;
                self.notify_use_page(pages, &handle, progress)?;
                Ok(handle)
            }
        }
    }

    /// Frees area `key` of an attached leaf and updates the summaries.
    pub fn release_area(
        &mut self,
        pages: &mut Pages,
        handle: &PageHandle,
        key: u16,
        progress: Option<&mut Progress>,
    ) -> Result<u32> {
        handle.with_write(|bytes| Leaf::new(bytes).free(key))??;
        let free = leaf_free(handle)?;
        self.update(pages, handle.id(), free, None)?;
        if let Some(progress) = progress {
            self.notify_unuse_area(AreaId::new(handle.id(), key), free, progress)?;
        }
        Ok(free)
    }

    /// Registers a leaf seen by the verification pass.
    pub fn notify_use_page(
        &mut self,
        pages: &mut Pages,
        handle: &PageHandle,
        progress: &mut Progress,
    ) -> Result<()> {
        let id = handle.id();
        let last = pages.last_page_id()?;
        if id > last {
            progress.inconsistent(Discrepancy::PageBeyondLast {
                page: id.0,
                last: last.0,
            })?;
        }
        if self.verify_map.contains(id) {
            return Ok(());
        }
        let header = handle.with_read(|bytes| Leaf::new(bytes).header())?;
        let inspection = handle.with_read(|bytes| Leaf::new(bytes).inspect(id, progress))?;
        if inspection.stale_empty_header {
            let finding = Discrepancy::LeafHeaderOffset {
                page: id.0,
                space_offset: i64::from(header.space_offset),
            };
            if progress.is_correcting() {
                let writable = if handle.is_writable() {
                    handle.clone()
                } else {
                    pages.leaf_for_verify(id, FixMode::DiscardableWrite, progress)?
                };
                writable.with_write(|bytes| Leaf::new(bytes).reset_empty_header())??;
                progress.corrected(finding);
            } else {
                progress.inconsistent(finding)?;
            }
        }
        let free = handle.with_read(|bytes| Leaf::new(bytes).verified_free_size())?;
        self.verify_map.insert(id, free, &inspection.keys);
        progress.leaf_verified();
        Ok(())
    }

    /// Marks an area as claimed by its owner.
    pub fn notify_use_area(&mut self, area: AreaId, progress: &mut Progress) -> Result<()> {
        self.verify_map.use_area(area, progress)?;
        progress.area_verified();
        Ok(())
    }

    /// Forgets an area freed during verification.
    pub fn notify_unuse_area(&mut self, area: AreaId, free: u32, progress: &mut Progress) -> Result<()> {
        self.verify_map.modify(area.page, Some(area.key), free, progress)
    }

    /// Records a leaf's free size after a resize during verification.
    pub fn notify_free_space_size(&mut self, page: PageId, free: u32, progress: &mut Progress) -> Result<()> {
        self.verify_map.modify(page, None, free, progress)
    }

    /// Drops the bookkeeping of the verification pass.
    pub fn clear_verify_map(&mut self) {
        self.verify_map.clear();
    }

    /// Checks every leaf and summary entry, depth first.
    pub fn verify(&mut self, pages: &mut Pages, progress: &mut Progress) -> Result<()> {
        let last = pages.last_page_id()?;
        self.verify_leaf(pages, last, progress)?;
        if last > MIN_LEAF {
            self.verify_nodes(pages, last, progress)?;
        }
        Ok(())
    }

    fn verify_leaf(&mut self, pages: &mut Pages, id: PageId, progress: &mut Progress) -> Result<u32> {
        if !self.verify_map.contains(id) {
            let mode = if progress.is_correcting() {
                FixMode::DiscardableWrite
            } else {
                FixMode::ReadOnly
            };
            self.attach_leaf(pages, id, mode, Some(&mut *progress))?;
        }
        let unclaimed = self.verify_map.unclaimed(id);
        if !unclaimed.is_empty() {
            if progress.is_correcting() {
                let handle = pages.leaf(id, FixMode::DiscardableWrite)?;
                for &key in unclaimed.iter().rev() {
                    self.release_area(pages, &handle, key, Some(&mut *progress))?;
                    progress.corrected(Discrepancy::UnusedArea { page: id.0, area: key });
                }
            } else {
                for &key in &unclaimed {
                    progress.inconsistent(Discrepancy::UnusedArea { page: id.0, area: key })?;
                }
            }
        }
        self.verify_map
            .get(id)
            .map(|record| record.free)
            .ok_or(AreaError::Unexpected("verified leaf missing from bookkeeping"))
    }

    fn fix_node_for_verify(
        &mut self,
        pages: &mut Pages,
        page: PageId,
        progress: &mut Progress,
    ) -> Result<PageHandle> {
        pages.node(page, FixMode::ReadOnly).map_err(|err| {
            progress.aborted(Discrepancy::CannotFixNode { page: page.0 });
            AreaError::Aborted(Box::new(err))
        })
    }

    fn verify_nodes(&mut self, pages: &mut Pages, last: PageId, progress: &mut Progress) -> Result<()> {
        let geometry = *pages.geometry();
        let shape = geometry.root_shape(last);
        let mut cursor = shape.logical_root().0;
        let mut stack: SmallVec<[NodeFrame; LEAF_STEP as usize]> = SmallVec::new();
        self.fix_node_for_verify(pages, ROOT, progress)?;
        stack.push(NodeFrame {
            page: ROOT,
            last_index: geometry.last_index(ROOT, last, shape),
            next: 0,
            max: 0,
        });

        while let Some(frame) = stack.last_mut() {
            if frame.next > frame.last_index {
                let done = stack.pop();
                if let (Some(done), Some(parent)) = (done, stack.last_mut()) {
                    let index = parent.next;
                    let node_page = parent.page;
                    parent.next += 1;
                    parent.max = parent.max.max(done.max);
                    let child = done.page;
                    self.check_entry(pages, node_page, index, child, done.max, progress)?;
                }
                continue;
            }
            cursor += 1;
            let child = PageId(cursor);
            if geometry.is_leaf(child) {
                let node_page = frame.page;
                let index = frame.next;
                let size = self.verify_leaf(pages, child, progress)?;
                if let Some(frame) = stack.last_mut() {
                    frame.next += 1;
                    frame.max = frame.max.max(size);
                }
                self.check_entry(pages, node_page, index, child, size, progress)?;
            } else {
                self.fix_node_for_verify(pages, child, progress)?;
                stack.push(NodeFrame {
                    page: child,
                    last_index: geometry.last_index(child, last, shape),
                    next: 0,
                    max: 0,
                });
            }
        }
        Ok(())
    }

    fn check_entry(
        &mut self,
        pages: &mut Pages,
        node_page: PageId,
        index: u64,
        child: PageId,
        actual: u32,
        progress: &mut Progress,
    ) -> Result<()> {
        let stored = self
            .fix_node_for_verify(pages, node_page, progress)?
            .with_read(|bytes| node::entry(bytes, index))?;
        if stored == actual {
            return Ok(());
        }
        let finding = Discrepancy::NodeFreeSize {
            node: node_page.0,
            index: u32::try_from(index).unwrap_or(u32::MAX),
            stored,
            child: child.0,
            actual,
        };
        if progress.is_correcting() && progress.is_good() {
            pages
                .node(node_page, FixMode::DiscardableWrite)?
                .with_write(|bytes| node::set_entry(bytes, index, actual))??;
            progress.corrected(finding);
        } else {
            progress.inconsistent(finding)?;
        }
        Ok(())
    }
}
