//! Page-id arithmetic of the three-step free-space tree.
//!
//! Pages are numbered in pre-order: the root is page 0, every node is
//! followed by its subtrees, and leaves sit at step 3. The tree only covers
//! leaves before the last one; the root stands in for the shallowest node
//! that is actually needed.

use crate::types::page::{FILE_HDR_LEN, SUMMARY_ENTRY_LEN};
use crate::types::{AreaError, PageId, Result};

/// Depth of leaves below the root.
pub const LEAF_STEP: u8 = 3;
/// Page holding the root summary and the file header.
pub const ROOT: PageId = PageId(0);
/// First leaf page.
pub const MIN_LEAF: PageId = PageId(LEAF_STEP as u64);

/// Which node the root page currently stands in for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RootShape {
    /// Only the first leaf exists; no summary is kept.
    Empty,
    /// The root holds the summary of the node at this step.
    Shallow(u8),
    /// The root holds its own summary.
    Full,
}

impl RootShape {
    /// Step of the node the root stands in for.
    ///
    /// The first page of each step has an id equal to its step, so this is
    /// also the id of that node.
    pub fn step(self) -> u8 {
        match self {
            RootShape::Empty => LEAF_STEP,
            RootShape::Shallow(step) => step,
            RootShape::Full => 0,
        }
    }

    /// Page id of the node the root stands in for.
    pub fn logical_root(self) -> PageId {
        PageId(u64::from(self.step()))
    }
}

/// Fan-out and subtree sizes derived from the page length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TreeGeometry {
    max_children: u64,
    subtree: [u64; LEAF_STEP as usize],
    max_page_id: u64,
}

impl TreeGeometry {
    /// Derives the geometry for pages of `page_len` bytes.
    pub fn new(page_len: usize) -> Self {
        let max_children = (page_len.saturating_sub(FILE_HDR_LEN) / SUMMARY_ENTRY_LEN) as u64;
        let mut subtree = [1u64; LEAF_STEP as usize];
        subtree[1] = 1 + max_children;
        subtree[0] = 1 + max_children * subtree[1];
        Self {
            max_children,
            subtree,
            max_page_id: max_children * subtree[0],
        }
    }

    /// Entries per summary page.
    pub fn max_children(&self) -> u64 {
        self.max_children
    }

    /// Largest page id the tree can address.
    pub fn max_page_id(&self) -> PageId {
        PageId(self.max_page_id)
    }

    /// Depth of `id`: 0 for the root, [`LEAF_STEP`] for leaves.
    pub fn step_of(&self, id: PageId) -> u8 {
        let mut id = id.0;
        let mut step = 0u8;
        while step < LEAF_STEP && id != 0 {
            id = (id - 1) % self.subtree[step as usize];
            step += 1;
        }
        step
    }

    /// Returns `true` when `id` is a leaf.
    pub fn is_leaf(&self, id: PageId) -> bool {
        self.step_of(id) == LEAF_STEP
    }

    /// Physical parent of `child` and the child's entry index in it.
    pub fn parent(&self, child: PageId) -> (PageId, u64) {
        let mut id = child.0;
        let mut parent = 0u64;
        let mut index = 0u64;
        for step in 0..LEAF_STEP as usize {
            index = (id - 1) / self.subtree[step];
            id = (id - 1) % self.subtree[step];
            if id == 0 {
                break;
            }
            parent += index * self.subtree[step] + 1;
        }
        (PageId(parent), index)
    }

    /// Physical child `index` of `node`.
    pub fn child(&self, node: PageId, index: u64) -> PageId {
        let step = self.step_of(node) as usize;
        PageId(node.0 + index * self.subtree[step] + 1)
    }

    /// Parent of `child` with the logical root folded into [`ROOT`].
    pub fn substantial_parent(&self, child: PageId, shape: RootShape) -> (PageId, u64) {
        let (parent, index) = self.parent(child);
        if parent == shape.logical_root() {
            (ROOT, index)
        } else {
            (parent, index)
        }
    }

    /// Child `index` of `node`, reading [`ROOT`] as the logical root.
    pub fn substantial_child(&self, node: PageId, index: u64, shape: RootShape) -> PageId {
        if node == ROOT {
            self.child(shape.logical_root(), index)
        } else {
            self.child(node, index)
        }
    }

    /// Leaf immediately before `id`.
    pub fn previous_leaf(&self, id: PageId) -> PageId {
        let mut id = id.0.saturating_sub(1);
        while id > MIN_LEAF.0 && !self.is_leaf(PageId(id)) {
            id -= 1;
        }
        PageId(id.max(MIN_LEAF.0))
    }

    /// Leaf immediately after `id`, with the node pages skipped on the way.
    pub fn next_leaf(&self, id: PageId) -> Result<(PageId, Vec<PageId>)> {
        let mut nodes = Vec::new();
        let mut next = id.0 + 1;
        while !self.is_leaf(PageId(next)) {
            nodes.push(PageId(next));
            next += 1;
        }
        if next > self.max_page_id {
            return Err(AreaError::Full(next));
        }
        Ok((PageId(next), nodes))
    }

    /// Shape of the root when `last` is the last leaf.
    pub fn root_shape(&self, last: PageId) -> RootShape {
        if last <= MIN_LEAF {
            return RootShape::Empty;
        }
        let mut id = self.previous_leaf(last).0;
        let mut step = 0u8;
        while step < LEAF_STEP - 1 && (id - 1) / self.subtree[step as usize] == 0 {
            id = (id - 1) % self.subtree[step as usize];
            step += 1;
        }
        if step == 0 {
            RootShape::Full
        } else {
            RootShape::Shallow(step)
        }
    }

    /// Highest live entry index of `node` when `last` is the last leaf.
    pub fn last_index(&self, node: PageId, last: PageId, shape: RootShape) -> u64 {
        let mut id = self.previous_leaf(last);
        loop {
            let (parent, index) = self.substantial_parent(id, shape);
            if parent == node {
                return index;
            }
            if parent == ROOT {
                break;
            }
            id = parent;
        }
        self.max_children - 1
    }
}
