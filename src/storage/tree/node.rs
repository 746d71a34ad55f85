//! Summary entries on root and node pages, plus the file header on the root.

use crate::primitives::bytes::le;
use crate::types::page::{
    self, FILE_FORMAT_VERSION, FILE_HDR_LEN, FILE_MAGIC, MAX_PAGE_SIZE, SUMMARY_ENTRY_LEN,
};
use crate::types::{AreaError, Result};

/// Reads summary entry `index`.
pub fn entry(page: &[u8], index: u64) -> Result<u32> {
    le::get_u32(page, entry_at(index)?)
}

/// Writes summary entry `index`.
pub fn set_entry(page: &mut [u8], index: u64, size: u32) -> Result<()> {
    le::put_u32(page, entry_at(index)?, size)
}

fn entry_at(index: u64) -> Result<usize> {
    usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(SUMMARY_ENTRY_LEN))
        .and_then(|off| off.checked_add(FILE_HDR_LEN))
        .ok_or(AreaError::Corruption("summary index overflow"))
}

/// Zeroes the summary region of a page, keeping its header.
pub fn reset_entries(page: &mut [u8]) {
    if let Some(region) = page.get_mut(FILE_HDR_LEN..) {
        region.fill(0);
    }
}

/// Zeroes entries `from..=last`.
pub fn clear_after(page: &mut [u8], from: u64, last: u64) -> Result<()> {
    for index in from..=last {
        set_entry(page, index, 0)?;
    }
    Ok(())
}

/// Largest of entries `0..=last`.
pub fn max(page: &[u8], last: u64) -> Result<u32> {
    let mut max = 0;
    for index in 0..=last {
        max = max.max(entry(page, index)?);
    }
    Ok(max)
}

/// New maximum of a summary page after entry `updated` changed from `previous`.
///
/// Returns `None` when the maximum is unchanged and the ancestors need no
/// update.
pub fn updated_max(page: &[u8], last: u64, updated: u64, previous: u32) -> Result<Option<u32>> {
    let mut others = 0;
    let mut current = 0;
    for index in 0..=last {
        let value = entry(page, index)?;
        if index == updated {
            current = value;
        } else {
            others = others.max(value);
        }
    }
    let before = previous.max(others);
    let after = current.max(others);
    Ok((before != after).then_some(after))
}

/// Outcome of choosing a child on a non-root summary page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BestFit {
    /// Index of the smallest entry that still fits.
    pub index: Option<u64>,
    /// Largest entry below the requested size, reported only when the chosen
    /// entry is the single one that fits and thus the page's maximum.
    pub second: Option<u32>,
}

/// Best fit among entries `0..=last` of a node page.
pub fn best_fit(page: &[u8], last: u64, size: u32) -> Result<BestFit> {
    let mut fit: Option<(u64, u32)> = None;
    let mut less = 0u32;
    let mut fits = 0u32;
    for index in 0..=last {
        let value = entry(page, index)?;
        if value < size {
            less = less.max(value);
            continue;
        }
        fits += 1;
        match fit {
            Some((_, best)) if best <= value => {}
            _ => fit = Some((index, value)),
        }
        if fits > 1 && fit.map(|(_, best)| best) == Some(size) {
            break;
        }
    }
    Ok(BestFit {
        index: fit.map(|(index, _)| index),
        second: (fits == 1).then_some(less),
    })
}

/// Best fit among entries `0..=last` of the root page.
pub fn best_fit_root(page: &[u8], last: u64, size: u32) -> Result<Option<u64>> {
    let mut fit: Option<(u64, u32)> = None;
    for index in 0..=last {
        let value = entry(page, index)?;
        if value == size {
            return Ok(Some(index));
        }
        if value > size && fit.map_or(true, |(_, best)| value < best) {
            fit = Some((index, value));
        }
    }
    Ok(fit.map(|(index, _)| index))
}

fn check_identity(root: &[u8]) -> Result<()> {
    if root.get(page::header::MAGIC) != Some(&FILE_MAGIC[..]) {
        return Err(AreaError::Corruption("root page magic mismatch"));
    }
    let version = le::get_u16(root, page::header::FORMAT_VERSION.start)?;
    if version != FILE_FORMAT_VERSION {
        return Err(AreaError::Corruption("unsupported format version"));
    }
    Ok(())
}

/// Managed page count recorded in the root header.
pub fn managed_pages(root: &[u8]) -> Result<u64> {
    check_identity(root)?;
    le::get_u48(root, page::header::MANAGED_PAGES.start)
}

/// Page length and alignment the file was laid out with.
pub fn stamped_layout(root: &[u8]) -> Result<(usize, u32)> {
    check_identity(root)?;
    let page_len = match le::get_u16(root, page::header::PAGE_LEN.start)? {
        0 => MAX_PAGE_SIZE as usize,
        len => usize::from(len),
    };
    let alignment = u32::from(le::get_u16(root, page::header::ALIGNMENT.start)?);
    Ok((page_len, alignment))
}

/// Stamps the root header with the layout and the managed page count.
pub fn write_header(root: &mut [u8], page_len: usize, alignment: u32, managed_pages: u64) -> Result<()> {
    let stored_len = if page_len == MAX_PAGE_SIZE as usize {
        0
    } else {
        u16::try_from(page_len).map_err(|_| AreaError::Unexpected("page length exceeds 64 KiB"))?
    };
    let stored_alignment =
        u16::try_from(alignment).map_err(|_| AreaError::Unexpected("alignment exceeds 16 bits"))?;
    root.get_mut(page::header::MAGIC)
        .ok_or(AreaError::Corruption("root page too short"))?
        .copy_from_slice(&FILE_MAGIC);
    le::put_u16(root, page::header::FORMAT_VERSION.start, FILE_FORMAT_VERSION)?;
    le::put_u16(root, page::header::PAGE_LEN.start, stored_len)?;
    le::put_u16(root, page::header::ALIGNMENT.start, stored_alignment)?;
    le::put_u48(root, page::header::MANAGED_PAGES.start, managed_pages)
}
