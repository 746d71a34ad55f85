use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{AreaError, Result};

const MAX_FINDINGS: usize = 256;

/// How a verification pass treats the discrepancies it finds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    /// Repair what can be repaired and record the correction.
    Correct,
    /// Record discrepancies without touching any page.
    Check,
    /// Like `Check`, but the first inconsistency fails the pass.
    Strict,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// The discrepancy was repaired.
    Corrected,
    /// The discrepancy was left in place.
    Inconsistent,
    /// The pass could not continue.
    Aborted,
}

/// A discrepancy found while walking leaves and summary pages.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// An empty leaf whose space offset is not at the start of the content.
    LeafHeaderOffset {
        /// Leaf page.
        page: u64,
        /// Stored space offset.
        space_offset: i64,
    },
    /// The content region runs into the index region.
    LeafHeaderOverlap {
        /// Leaf page.
        page: u64,
        /// Stored area count.
        total: u16,
        /// Content-relative start of the index region.
        index_start: i64,
        /// Stored space offset.
        space_offset: i64,
    },
    /// The first index entry does not point at the start of the content.
    LeafIndexOffset {
        /// Leaf page.
        page: u64,
        /// Stored offset.
        offset: i64,
    },
    /// Index offsets are not strictly increasing.
    DisorderedIndexOffset {
        /// Leaf page.
        page: u64,
        /// Position of the entry in the index.
        position: u16,
        /// Offset of the entry.
        offset: i64,
        /// Offset of the previous entry.
        previous: i64,
    },
    /// Index keys are not strictly increasing.
    DisorderedIndexKey {
        /// Leaf page.
        page: u64,
        /// Position of the entry in the index.
        position: u16,
        /// Key of the entry.
        key: u16,
        /// Key of the previous entry.
        previous: u16,
    },
    /// The last area starts at or beyond the space offset.
    AreaOffset {
        /// Leaf page.
        page: u64,
        /// Position of the last entry.
        position: u16,
        /// Offset of the last entry.
        offset: i64,
        /// Stored space offset.
        space_offset: i64,
    },
    /// A page past the last managed leaf was referenced.
    PageBeyondLast {
        /// Referenced page.
        page: u64,
        /// Last managed leaf.
        last: u64,
    },
    /// An area was referenced that the leaf does not hold.
    UnknownArea {
        /// Leaf page.
        page: u64,
        /// Area key.
        area: u16,
    },
    /// The leaf holds an area nobody referenced.
    UnusedArea {
        /// Leaf page.
        page: u64,
        /// Area key.
        area: u16,
    },
    /// A summary entry disagrees with the recomputed free size of its child.
    NodeFreeSize {
        /// Summary page.
        node: u64,
        /// Entry index in the summary page.
        index: u32,
        /// Stored value.
        stored: u32,
        /// Child page the entry describes.
        child: u64,
        /// Recomputed value.
        actual: u32,
    },
    /// A summary page could not be fixed.
    CannotFixNode {
        /// Summary page.
        page: u64,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::LeafHeaderOffset { page, space_offset } => write!(
                f,
                "leaf {page}: empty page has space offset {space_offset}"
            ),
            Discrepancy::LeafHeaderOverlap {
                page,
                total,
                index_start,
                space_offset,
            } => write!(
                f,
                "leaf {page}: {total} index entries start at {index_start} below space offset {space_offset}"
            ),
            Discrepancy::LeafIndexOffset { page, offset } => {
                write!(f, "leaf {page}: first area starts at {offset}")
            }
            Discrepancy::DisorderedIndexOffset {
                page,
                position,
                offset,
                previous,
            } => write!(
                f,
                "leaf {page}: entry {position} offset {offset} not above {previous}"
            ),
            Discrepancy::DisorderedIndexKey {
                page,
                position,
                key,
                previous,
            } => write!(
                f,
                "leaf {page}: entry {position} key {key} not above {previous}"
            ),
            Discrepancy::AreaOffset {
                page,
                position,
                offset,
                space_offset,
            } => write!(
                f,
                "leaf {page}: entry {position} offset {offset} at or past space offset {space_offset}"
            ),
            Discrepancy::PageBeyondLast { page, last } => {
                write!(f, "page {page} used beyond last leaf {last}")
            }
            Discrepancy::UnknownArea { page, area } => {
                write!(f, "area {page}:{area} is not allocated")
            }
            Discrepancy::UnusedArea { page, area } => {
                write!(f, "area {page}:{area} is allocated but unused")
            }
            Discrepancy::NodeFreeSize {
                node,
                index,
                stored,
                child,
                actual,
            } => write!(
                f,
                "node {node} entry {index} holds {stored}, child {child} has {actual}"
            ),
            Discrepancy::CannotFixNode { page } => write!(f, "cannot fix node {page}"),
        }
    }
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// What was found.
    pub discrepancy: Discrepancy,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Leaves inspected.
    pub leaves_verified: u64,
    /// Areas referenced through area verification.
    pub areas_verified: u64,
    /// Findings that were repaired.
    pub corrected: u64,
    /// Findings left in place.
    pub inconsistent: u64,
    /// Findings dropped after the report filled up.
    pub dropped: u64,
}

/// Complete report of a verification pass.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The treatment the pass ran under.
    pub treatment: Treatment,
    /// Whether the pass ended without inconsistencies or aborts.
    pub success: bool,
    /// Issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Counters describing the pass.
    pub counts: VerifyCounts,
}

/// Accumulates findings of one verification pass.
#[derive(Debug)]
pub struct Progress {
    treatment: Treatment,
    good: bool,
    findings: Vec<VerifyFinding>,
    counts: VerifyCounts,
}

impl Progress {
    /// Starts an empty accumulator.
    pub fn new(treatment: Treatment) -> Self {
        Self {
            treatment,
            good: true,
            findings: Vec::new(),
            counts: VerifyCounts::default(),
        }
    }

    /// The treatment this pass runs under.
    pub fn treatment(&self) -> Treatment {
        self.treatment
    }

    /// Returns `true` when repairs are allowed.
    pub fn is_correcting(&self) -> bool {
        self.treatment == Treatment::Correct
    }

    /// Returns `true` while no inconsistency or abort has been recorded.
    pub fn is_good(&self) -> bool {
        self.good
    }

    /// Findings recorded so far.
    pub fn findings(&self) -> &[VerifyFinding] {
        &self.findings
    }

    /// Counters recorded so far.
    pub fn counts(&self) -> &VerifyCounts {
        &self.counts
    }

    /// Records a repaired discrepancy.
    pub fn corrected(&mut self, discrepancy: Discrepancy) {
        debug!(finding = %discrepancy, "verify.corrected");
        self.counts.corrected += 1;
        self.push(VerifySeverity::Corrected, discrepancy);
    }

    /// Records a discrepancy that was left in place.
    ///
    /// Under [`Treatment::Strict`] the finding is returned as an error.
    pub fn inconsistent(&mut self, discrepancy: Discrepancy) -> Result<()> {
        warn!(finding = %discrepancy, "verify.inconsistent");
        self.good = false;
        self.counts.inconsistent += 1;
        let message = discrepancy.to_string();
        self.push(VerifySeverity::Inconsistent, discrepancy);
        if self.treatment == Treatment::Strict {
            return Err(AreaError::Inconsistent(message));
        }
        Ok(())
    }

    /// Records that the pass cannot continue.
    pub fn aborted(&mut self, discrepancy: Discrepancy) {
        warn!(finding = %discrepancy, "verify.aborted");
        self.good = false;
        self.push(VerifySeverity::Aborted, discrepancy);
    }

    pub(crate) fn leaf_verified(&mut self) {
        self.counts.leaves_verified += 1;
    }

    pub(crate) fn area_verified(&mut self) {
        self.counts.areas_verified += 1;
    }

    /// Consumes the accumulator into a report.
    pub fn into_report(self) -> VerifyReport {
        VerifyReport {
            treatment: self.treatment,
            success: self.good,
            findings: self.findings,
            counts: self.counts,
        }
    }

    fn push(&mut self, severity: VerifySeverity, discrepancy: Discrepancy) {
        if self.findings.len() >= MAX_FINDINGS {
            self.counts.dropped += 1;
            return;
        }
        let message = discrepancy.to_string();
        self.findings.push(VerifyFinding {
            severity,
            discrepancy,
            message,
        });
    }
}
