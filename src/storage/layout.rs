use crate::storage::leaf;
use crate::storage::options::AreaFileOptions;
use crate::storage::tree::TreeGeometry;
use crate::types::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::types::{AreaError, Result};

/// Page size, alignment, and tree shape fixed for the life of an open file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileLayout {
    page_len: usize,
    alignment: u32,
    max_storable: u32,
    geometry: TreeGeometry,
}

impl FileLayout {
    /// Validates `options` against the store's page size.
    pub fn new(store_page_size: u32, options: &AreaFileOptions) -> Result<Self> {
        let page_size = match options.page_size {
            Some(limit) => limit.min(store_page_size),
            None => store_page_size,
        };
        if page_size > MAX_PAGE_SIZE {
            return Err(AreaError::NotSupported("page size above 64 KiB"));
        }
        if page_size < MIN_PAGE_SIZE {
            return Err(AreaError::BadArgument("page size below minimum"));
        }
        let alignment = options.alignment;
        if alignment == 0 || !alignment.is_power_of_two() || alignment >= page_size {
            return Err(AreaError::BadArgument("alignment must be a small power of two"));
        }
        let page_len = page_size as usize;
        let max_storable = leaf::max_storable(page_len) & !(alignment - 1);
        if max_storable == 0 {
            return Err(AreaError::BadArgument("alignment leaves no storable bytes"));
        }
        Ok(Self {
            page_len,
            alignment,
            max_storable,
            geometry: TreeGeometry::new(page_len),
        })
    }

    /// Bytes of each page the file manages.
    pub fn page_len(&self) -> usize {
        self.page_len
    }

    /// Alignment every area size is rounded up to.
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Largest area the file can allocate.
    pub fn max_storable(&self) -> u32 {
        self.max_storable
    }

    /// Shape of the free-space tree.
    pub fn geometry(&self) -> &TreeGeometry {
        &self.geometry
    }

    /// Rounds `size` up to the alignment.
    pub fn round_up(&self, size: u32) -> Option<u32> {
        let mask = self.alignment - 1;
        size.checked_add(mask).map(|s| s & !mask)
    }
}
