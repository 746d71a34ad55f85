//! In-page area allocator.
//!
//! A leaf page is laid out as a fixed header, a content region where areas
//! sit back to back in ascending offset order, and an index that grows
//! backward from the end of the page:
//!
//! ```text
//! +--------+----------------------------+ ... free ... +---------+---------+
//! | header | area0 | area1 | ... | areaN |              | entry N | entry 0 |
//! +--------+----------------------------+ ... free ... +---------+---------+
//! ```
//!
//! Index entries are sorted by key and by offset at the same time. Offsets
//! are relative to the start of the content region.

use std::ops::Range;

use tracing::trace;

use crate::admin::{Discrepancy, Progress};
use crate::primitives::bytes::le;
use crate::types::page::{self, INDEX_ENTRY_LEN, LEAF_HDR_LEN};
use crate::types::{AreaError, PageId, Result};

/// Decoded leaf header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeafHeader {
    /// Number of allocated areas.
    pub total: u16,
    /// First content byte past the last area.
    pub space_offset: i32,
}

/// Decoded index entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// Area key.
    pub key: u16,
    /// Content-relative offset of the area.
    pub offset: i32,
}

/// Result of inspecting a leaf during verification.
#[derive(Clone, Debug, Default)]
pub struct LeafInspection {
    /// Keys found in the index, in index order.
    pub keys: Vec<u16>,
    /// The page holds no area but its space offset is not zero.
    pub stale_empty_header: bool,
}

/// Free size that remains once one more index entry is reserved.
pub fn reserve_index_entry(free: u32) -> u32 {
    free.saturating_sub(INDEX_ENTRY_LEN as u32)
}

/// Largest area a fresh page of `page_len` bytes can hold.
pub fn max_storable(page_len: usize) -> u32 {
    let capacity = page_len.saturating_sub(LEAF_HDR_LEN);
    reserve_index_entry(u32::try_from(capacity).unwrap_or(u32::MAX))
}

/// Allocator over the bytes of one leaf page.
///
/// Read-only operations work over any byte container; mutations need a
/// mutable one.
pub struct Leaf<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> Leaf<B> {
    /// Wraps the first `page_len` bytes of a page.
    pub fn new(bytes: B) -> Self {
        Self { bytes }
    }

    fn data(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    fn len(&self) -> usize {
        self.data().len()
    }

    /// Size of the content region.
    pub fn capacity(&self) -> usize {
        self.len().saturating_sub(LEAF_HDR_LEN)
    }

    /// Decodes the header.
    pub fn header(&self) -> Result<LeafHeader> {
        let data = self.data();
        Ok(LeafHeader {
            total: le::get_u16(data, page::leaf::TOTAL.start)?,
            space_offset: le::get_i32(data, page::leaf::SPACE_OFFSET.start)?,
        })
    }

    /// Number of allocated areas.
    pub fn area_count(&self) -> Result<u16> {
        Ok(self.header()?.total)
    }

    fn entry_at(&self, pos: usize) -> Result<usize> {
        let back = (pos + 1)
            .checked_mul(INDEX_ENTRY_LEN)
            .ok_or(AreaError::Corruption("leaf index position overflow"))?;
        let at = self
            .len()
            .checked_sub(back)
            .ok_or(AreaError::Corruption("leaf index past start of page"))?;
        if at < LEAF_HDR_LEN {
            return Err(AreaError::Corruption("leaf index overlaps header"));
        }
        Ok(at)
    }

    /// Reads the index entry at `pos` (0 is the entry with the lowest key).
    pub fn entry(&self, pos: usize) -> Result<IndexEntry> {
        let at = self.entry_at(pos)?;
        let data = self.data();
        Ok(IndexEntry {
            key: le::get_u16(data, at + page::index::KEY.start)?,
            offset: le::get_i32(data, at + page::index::OFFSET.start)?,
        })
    }

    /// Locates the index position of `key`.
    pub fn find(&self, key: u16) -> Result<Option<usize>> {
        let total = self.area_count()? as usize;
        if total == 0 {
            return Ok(None);
        }
        // Keys are unique and ascending, so `key` sits at or before position `key`.
        let mut lo = 0usize;
        let mut hi = total.min(key as usize + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probe = self.entry(mid)?.key;
            if probe == key {
                return Ok(Some(mid));
            }
            if probe < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(None)
    }

    fn span_at(&self, header: &LeafHeader, pos: usize) -> Result<Range<usize>> {
        let start = offset_to_usize(self.entry(pos)?.offset)?;
        let end = if pos + 1 == header.total as usize {
            offset_to_usize(header.space_offset)?
        } else {
            offset_to_usize(self.entry(pos + 1)?.offset)?
        };
        if end < start || end > self.capacity() {
            return Err(AreaError::Corruption("leaf area span out of order"));
        }
        Ok(start..end)
    }

    /// Content-relative byte range of area `key`, or `None` if it is not allocated.
    pub fn span_of(&self, key: u16) -> Result<Option<Range<usize>>> {
        match self.find(key)? {
            Some(pos) => {
                let header = self.header()?;
                self.span_at(&header, pos).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Offset of area `key`, or `None` if it is not allocated.
    pub fn offset_of(&self, key: u16) -> Result<Option<u32>> {
        Ok(self.span_of(key)?.map(|span| span.start as u32))
    }

    /// Size of area `key`, or `None` if it is not allocated.
    pub fn size_of(&self, key: u16) -> Result<Option<u32>> {
        Ok(self.span_of(key)?.map(|span| span.len() as u32))
    }

    /// Free bytes between the content and index regions.
    ///
    /// With `allocating` set, one more index entry is reserved, which is the
    /// largest area a new allocation could receive.
    pub fn free_size(&self, allocating: bool) -> Result<u32> {
        let header = self.header()?;
        let used = (offset_to_usize(header.space_offset)? as u64)
            + header.total as u64 * INDEX_ENTRY_LEN as u64;
        let capacity = self.capacity() as u64;
        if used > capacity {
            return Err(AreaError::Unexpected("leaf content overlaps its index"));
        }
        let free = (capacity - used) as u32;
        Ok(if allocating {
            reserve_index_entry(free)
        } else {
            free
        })
    }

    /// Returns the smallest unused key and the index position it belongs at.
    ///
    /// Keys below position `i` are dense exactly when `entry(i).key == i`, so
    /// the first gap is found by bisection.
    pub fn unused_key(&self) -> Result<(u16, usize)> {
        let total = self.area_count()? as usize;
        if total == 0 || self.entry(0)?.key != 0 {
            return Ok((0, 0));
        }
        if self.entry(total - 1)?.key as usize == total - 1 {
            let key = u16::try_from(total)
                .map_err(|_| AreaError::Unexpected("leaf area keys exhausted"))?;
            return Ok((key, total));
        }
        let mut lo = 1usize;
        let mut hi = total - 1;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid)?.key as usize == mid {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok((lo as u16, lo))
    }

    /// Checks the header and index, recording what is wrong into `progress`.
    ///
    /// A stale header of an empty page is left to the caller, which may
    /// repair it.
    pub fn inspect(&self, page: PageId, progress: &mut Progress) -> Result<LeafInspection> {
        let header = self.header()?;
        let mut inspection = LeafInspection::default();
        let total = header.total;
        let space_offset = header.space_offset as i64;
        if total == 0 && header.space_offset != 0 {
            inspection.stale_empty_header = true;
        }
        let index_len = total as i64 * INDEX_ENTRY_LEN as i64;
        let index_start = self.capacity() as i64 - index_len;
        if index_start < space_offset || space_offset < 0 {
            progress.inconsistent(Discrepancy::LeafHeaderOverlap {
                page: page.0,
                total,
                index_start,
                space_offset,
            })?;
        }
        if index_start < 0 {
            return Ok(inspection);
        }

        let mut prev_key = 0u16;
        let mut prev_offset = 0i64;
        for pos in 0..total {
            let entry = self.entry(pos as usize)?;
            let offset = entry.offset as i64;
            if pos == 0 {
                if offset != 0 {
                    progress.inconsistent(Discrepancy::LeafIndexOffset {
                        page: page.0,
                        offset,
                    })?;
                }
            } else {
                if offset <= prev_offset {
                    progress.inconsistent(Discrepancy::DisorderedIndexOffset {
                        page: page.0,
                        position: pos,
                        offset,
                        previous: prev_offset,
                    })?;
                }
                if entry.key <= prev_key {
                    progress.inconsistent(Discrepancy::DisorderedIndexKey {
                        page: page.0,
                        position: pos,
                        key: entry.key,
                        previous: prev_key,
                    })?;
                }
            }
            prev_offset = offset;
            prev_key = entry.key;
            inspection.keys.push(entry.key);
        }
        if total != 0 && prev_offset >= space_offset {
            progress.inconsistent(Discrepancy::AreaOffset {
                page: page.0,
                position: total - 1,
                offset: prev_offset,
                space_offset,
            })?;
        }
        Ok(inspection)
    }

    /// Free size reported for a leaf during verification, tolerating overlap.
    pub fn verified_free_size(&self) -> Result<u32> {
        match self.free_size(true) {
            Ok(free) => Ok(free),
            Err(AreaError::Unexpected(_)) => Ok(0),
            Err(err) => Err(err),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Leaf<B> {
    fn data_mut(&mut self) -> &mut [u8] {
        self.bytes.as_mut()
    }

    fn write_header(&mut self, header: LeafHeader) -> Result<()> {
        let data = self.data_mut();
        le::put_u16(data, page::leaf::TOTAL.start, header.total)?;
        le::put_u16(data, page::leaf::RESERVED.start, 0)?;
        le::put_i32(data, page::leaf::SPACE_OFFSET.start, header.space_offset)
    }

    fn write_entry(&mut self, pos: usize, entry: IndexEntry) -> Result<()> {
        let at = self.entry_at(pos)?;
        let data = self.data_mut();
        le::put_u16(data, at + page::index::KEY.start, entry.key)?;
        le::put_u16(data, at + page::index::RESERVED.start, 0)?;
        le::put_i32(data, at + page::index::OFFSET.start, entry.offset)
    }

    fn shift_offsets(&mut self, from: usize, to: usize, delta: i64) -> Result<()> {
        for pos in from..to {
            let mut entry = self.entry(pos)?;
            entry.offset = offset_from_i64(entry.offset as i64 + delta)?;
            self.write_entry(pos, entry)?;
        }
        Ok(())
    }

    /// Moves content bytes `[from, end)` by `delta`.
    fn move_content(&mut self, from: usize, end: usize, delta: i64) -> Result<()> {
        if from == end || delta == 0 {
            return Ok(());
        }
        let dst = from as i64 + delta;
        let capacity = self.capacity() as i64;
        if dst < 0 || dst + (end - from) as i64 > capacity {
            return Err(AreaError::Unexpected("leaf content move out of range"));
        }
        let base = LEAF_HDR_LEN;
        self.data_mut()
            .copy_within(base + from..base + end, base + dst as usize);
        Ok(())
    }

    fn zero_content(&mut self, range: Range<usize>) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let base = LEAF_HDR_LEN;
        let bytes = self
            .data_mut()
            .get_mut(base + range.start..base + range.end)
            .ok_or(AreaError::Unexpected("leaf zero range out of page"))?;
        bytes.fill(0);
        Ok(())
    }

    /// Resets the header of a freshly allocated page.
    pub fn initialize(&mut self) -> Result<()> {
        self.write_header(LeafHeader {
            total: 0,
            space_offset: 0,
        })
    }

    /// Carves a zero-filled area of `size` bytes and returns its key.
    ///
    /// `size` is expected to be aligned already.
    pub fn allocate(&mut self, size: u32) -> Result<u16> {
        if size == 0 {
            return Err(AreaError::BadArgument("area size is zero"));
        }
        if size > self.free_size(true)? {
            return Err(AreaError::Unexpected("leaf has no room for the area"));
        }
        let header = self.header()?;
        let total = header.total as usize;
        let space = offset_to_usize(header.space_offset)?;
        let len = size as usize;
        let (key, pos) = self.unused_key()?;
        let offset = if pos < total {
            let offset = offset_to_usize(self.entry(pos)?.offset)?;
            self.move_content(offset, space, len as i64)?;
            let src = self.entry_at(total - 1)?..self.entry_at(pos)? + INDEX_ENTRY_LEN;
            let dst = src.start - INDEX_ENTRY_LEN;
            self.data_mut().copy_within(src, dst);
            self.shift_offsets(pos + 1, total + 1, len as i64)?;
            offset
        } else {
            space
        };
        self.write_entry(
            pos,
            IndexEntry {
                key,
                offset: offset_from_i64(offset as i64)?,
            },
        )?;
        self.write_header(LeafHeader {
            total: header.total + 1,
            space_offset: offset_from_i64((space + len) as i64)?,
        })?;
        self.zero_content(offset..offset + len)?;
        trace!(key, offset, size, "leaf.allocate");
        Ok(key)
    }

    /// Releases area `key`, compacting the areas behind it.
    pub fn free(&mut self, key: u16) -> Result<()> {
        let pos = self
            .find(key)?
            .ok_or(AreaError::BadArgument("area is not allocated"))?;
        let header = self.header()?;
        let total = header.total as usize;
        let space = offset_to_usize(header.space_offset)?;
        let span = self.span_at(&header, pos)?;
        let freed = span.len();
        if pos + 1 < total {
            self.move_content(span.end, space, -(freed as i64))?;
            let src = self.entry_at(total - 1)?..self.entry_at(pos + 1)? + INDEX_ENTRY_LEN;
            let dst = src.start + INDEX_ENTRY_LEN;
            self.data_mut().copy_within(src, dst);
            self.shift_offsets(pos, total - 1, -(freed as i64))?;
        }
        let vacated = self.entry_at(total - 1)?;
        self.data_mut()[vacated..vacated + INDEX_ENTRY_LEN].fill(0);
        let new_space = space - freed;
        self.write_header(LeafHeader {
            total: header.total - 1,
            space_offset: offset_from_i64(new_space as i64)?,
        })?;
        self.zero_content(new_space..space)?;
        trace!(key, freed, "leaf.free");
        Ok(())
    }

    /// Resizes area `key` in place to `rounded` bytes.
    ///
    /// `requested` is the caller's unaligned size; bytes past it up to
    /// `rounded` are zeroed. Returns `Ok(false)` when the page lacks room.
    pub fn resize(&mut self, key: u16, requested: u32, rounded: u32) -> Result<bool> {
        if requested > rounded {
            return Err(AreaError::BadArgument("requested size above aligned size"));
        }
        let pos = self
            .find(key)?
            .ok_or(AreaError::BadArgument("area is not allocated"))?;
        let header = self.header()?;
        let total = header.total as usize;
        let space = offset_to_usize(header.space_offset)?;
        let span = self.span_at(&header, pos)?;
        let former = span.len() as i64;
        let diff = rounded as i64 - former;
        let requested = requested as usize;
        let rounded = rounded as usize;
        if diff == 0 {
            self.zero_content(span.start + requested..span.start + rounded)?;
            return Ok(true);
        }
        if diff > self.free_size(false)? as i64 {
            return Ok(false);
        }
        if pos + 1 < total {
            self.move_content(span.end, space, diff)?;
            self.shift_offsets(pos + 1, total, diff)?;
        }
        let new_space = (space as i64 + diff) as usize;
        self.write_header(LeafHeader {
            total: header.total,
            space_offset: offset_from_i64(new_space as i64)?,
        })?;
        if diff > 0 {
            self.zero_content(span.start + former as usize..span.start + rounded)?;
        } else {
            self.zero_content(span.start + requested..span.start + rounded)?;
            self.zero_content(new_space..space)?;
        }
        trace!(key, former, rounded, "leaf.resize");
        Ok(true)
    }

    /// Resets the space offset of an empty page.
    pub fn reset_empty_header(&mut self) -> Result<()> {
        let header = self.header()?;
        if header.total != 0 {
            return Err(AreaError::Unexpected("leaf header reset with areas present"));
        }
        self.initialize()
    }

    /// Mutable view of area `key`, or `None` if it is not allocated.
    pub fn area_bytes_mut(&mut self, key: u16) -> Result<Option<&mut [u8]>> {
        match self.span_of(key)? {
            Some(span) => {
                let base = LEAF_HDR_LEN;
                Ok(self.data_mut().get_mut(base + span.start..base + span.end))
            }
            None => Ok(None),
        }
    }
}

impl<B: AsRef<[u8]>> Leaf<B> {
    /// View of area `key`, or `None` if it is not allocated.
    pub fn area_bytes(&self, key: u16) -> Result<Option<&[u8]>> {
        match self.span_of(key)? {
            Some(span) => {
                let base = LEAF_HDR_LEN;
                Ok(self.data().get(base + span.start..base + span.end))
            }
            None => Ok(None),
        }
    }
}

fn offset_to_usize(offset: i32) -> Result<usize> {
    usize::try_from(offset).map_err(|_| AreaError::Corruption("negative leaf offset"))
}

fn offset_from_i64(offset: i64) -> Result<i32> {
    i32::try_from(offset).map_err(|_| AreaError::Unexpected("leaf offset out of range"))
}
