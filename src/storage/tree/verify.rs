use std::collections::BTreeMap;

use crate::admin::{Discrepancy, Progress};
use crate::types::{AreaError, AreaId, PageId, Result};

/// What a verification pass learned about one leaf.
#[derive(Clone, Debug, Default)]
pub(crate) struct LeafRecord {
    /// Recomputed free size.
    pub free: u32,
    /// Areas found in the index, and whether any caller claimed them.
    pub areas: BTreeMap<u16, bool>,
}

/// Per-leaf bookkeeping kept between `begin_verification` and `end_verification`.
#[derive(Debug, Default)]
pub(crate) struct VerifyMap {
    leaves: BTreeMap<PageId, LeafRecord>,
}

impl VerifyMap {
    pub fn contains(&self, page: PageId) -> bool {
        self.leaves.contains_key(&page)
    }

    pub fn insert(&mut self, page: PageId, free: u32, keys: &[u16]) {
        let areas = keys.iter().map(|&key| (key, false)).collect();
        self.leaves.insert(page, LeafRecord { free, areas });
    }

    pub fn get(&self, page: PageId) -> Option<&LeafRecord> {
        self.leaves.get(&page)
    }

    /// Marks `area` as claimed.
    pub fn use_area(&mut self, area: AreaId, progress: &mut Progress) -> Result<()> {
        let record = self
            .leaves
            .get_mut(&area.page)
            .ok_or(AreaError::Unexpected("area verified before its page"))?;
        match record.areas.get_mut(&area.key) {
            Some(used) => *used = true,
            None => progress.inconsistent(Discrepancy::UnknownArea {
                page: area.page.0,
                area: area.key,
            })?,
        }
        Ok(())
    }

    /// Forgets `area` (if given) and records the leaf's new free size.
    pub fn modify(
        &mut self,
        page: PageId,
        area: Option<u16>,
        free: u32,
        progress: &mut Progress,
    ) -> Result<()> {
        let record = self
            .leaves
            .get_mut(&page)
            .ok_or(AreaError::Unexpected("leaf changed before it was verified"))?;
        if let Some(key) = area {
            if record.areas.remove(&key).is_none() {
                progress.inconsistent(Discrepancy::UnknownArea {
                    page: page.0,
                    area: key,
                })?;
            }
        }
        record.free = free;
        Ok(())
    }

    /// Areas of `page` nobody claimed, in key order.
    pub fn unclaimed(&self, page: PageId) -> Vec<u16> {
        self.leaves
            .get(&page)
            .map(|record| {
                record
                    .areas
                    .iter()
                    .filter(|(_, used)| !**used)
                    .map(|(key, _)| *key)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.leaves.clear();
    }
}
