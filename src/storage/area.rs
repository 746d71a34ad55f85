use std::fmt;

use crate::storage::cache::PageHandle;
use crate::storage::leaf::Leaf;
use crate::types::{AreaError, AreaId, Result};

/// An allocated area attached through an [`super::AreaFile`].
///
/// The area is looked up by key on every access, so it stays valid while
/// neighbouring areas of the same page move. It must not be used after the
/// file detached or recovered its pages.
#[derive(Clone)]
pub struct Area {
    id: AreaId,
    page: PageHandle,
}

impl Area {
    pub(crate) fn new(id: AreaId, page: PageHandle) -> Self {
        Self { id, page }
    }

    /// Identifier of the area.
    pub fn id(&self) -> AreaId {
        self.id
    }

    /// Returns `true` when the area may be written.
    pub fn is_writable(&self) -> bool {
        self.page.is_writable()
    }

    /// Content-relative offset of the area in its page.
    pub fn offset(&self) -> Result<u32> {
        let key = self.id.key;
        self.page
            .with_read(|bytes| Leaf::new(bytes).offset_of(key))?
            .ok_or(AreaError::BadArgument("area is not allocated"))
    }

    /// Size of the area in bytes, including alignment padding.
    pub fn size(&self) -> Result<u32> {
        let key = self.id.key;
        self.page
            .with_read(|bytes| Leaf::new(bytes).size_of(key))?
            .ok_or(AreaError::BadArgument("area is not allocated"))
    }

    /// Runs `f` over the area bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let key = self.id.key;
        self.page.with_read(|bytes| -> Result<R> {
            match Leaf::new(bytes).area_bytes(key)? {
                Some(area) => Ok(f(area)),
                None => Err(AreaError::BadArgument("area is not allocated")),
            }
        })
    }

    /// Copies the area bytes out.
    pub fn read(&self) -> Result<Vec<u8>> {
        self.with_bytes(<[u8]>::to_vec)
    }

    /// Runs `f` over the mutable area bytes and marks the page dirty.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let key = self.id.key;
        self.page.with_write(|bytes| -> Result<R> {
            match Leaf::new(bytes).area_bytes_mut(key)? {
                Some(area) => Ok(f(area)),
                None => Err(AreaError::BadArgument("area is not allocated")),
            }
        })?
    }

    /// Writes `data` at byte `offset` of the area.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.with_bytes_mut(|area| -> Result<()> {
            let end = offset
                .checked_add(data.len())
                .filter(|end| *end <= area.len())
                .ok_or(AreaError::BadArgument("write past end of area"))?;
            area[offset..end].copy_from_slice(data);
            Ok(())
        })?
    }
}

impl fmt::Debug for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Area")
            .field("id", &self.id)
            .field("mode", &self.page.mode())
            .finish()
    }
}
