#![forbid(unsafe_code)]
//! Identifiers, the crate-wide error type, and on-page layout constants.

use std::fmt;

/// Sequential identifier of a page in the backing store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Identifier of an area inside one leaf page.
///
/// The in-page key is assigned compactly: the smallest unused key is always
/// handed out first.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct AreaId {
    /// Leaf page holding the area.
    pub page: PageId,
    /// Key of the area inside the page.
    pub key: u16,
}

impl AreaId {
    /// Builds an identifier from its parts.
    pub const fn new(page: PageId, key: u16) -> Self {
        Self { page, key }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page.0, self.key)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u64 {
    fn from(value: PageId) -> Self {
        value.0
    }
}

/// Errors raised by the allocator, the free-space tree, and the page store seam.
#[derive(thiserror::Error, Debug)]
pub enum AreaError {
    /// I/O failure reported by a page store.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A caller supplied an invalid size, identifier, or configuration.
    #[error("bad argument: {0}")]
    BadArgument(&'static str),
    /// The entry point exists for interface compatibility only.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    /// The page store could not provide memory for a page.
    #[error("memory exhausted")]
    MemoryExhausted,
    /// Internal bookkeeping contradicted itself.
    #[error("unexpected: {0}")]
    Unexpected(&'static str),
    /// Page bytes could not be decoded.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A strict verification pass found an inconsistency.
    #[error("inconsistent: {0}")]
    Inconsistent(String),
    /// A verification pass could not continue.
    #[error("verification aborted")]
    Aborted(#[source] Box<AreaError>),
    /// The file cannot grow any further.
    #[error("file is full: page id {0} exceeds the tree capacity")]
    Full(u64),
    /// Shrinking the backing store failed.
    #[error("file manipulation failed")]
    FileManipulate(#[source] Box<AreaError>),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AreaError>;

pub mod page {
    //! On-page layout shared by leaf and summary pages.
    //!
    //! All multi-byte fields are little endian.

    /// Largest page size the format can address.
    pub const MAX_PAGE_SIZE: u32 = 0x0001_0000;
    /// Smallest usable page size.
    pub const MIN_PAGE_SIZE: u32 = 64;
    /// Default page size for stores that do not impose one.
    pub const DEFAULT_PAGE_SIZE: u32 = 4096;
    /// Default area alignment in bytes.
    pub const DEFAULT_ALIGNMENT: u32 = 4;

    /// Length of the header at the start of every leaf page.
    pub const LEAF_HDR_LEN: usize = 8;
    /// Length of one index entry at the tail of a leaf page.
    pub const INDEX_ENTRY_LEN: usize = 8;

    /// Length of the header region at the start of the root and node pages.
    pub const FILE_HDR_LEN: usize = 16;
    /// Length of one free-size summary entry.
    pub const SUMMARY_ENTRY_LEN: usize = 4;

    /// Magic stamped on the root page.
    pub const FILE_MAGIC: [u8; 4] = *b"AREA";
    /// Current format version.
    pub const FILE_FORMAT_VERSION: u16 = 1;

    pub mod leaf {
        //! Byte offsets of the leaf header fields.
        use core::ops::Range;

        pub const TOTAL: Range<usize> = 0..2;
        pub const RESERVED: Range<usize> = 2..4;
        pub const SPACE_OFFSET: Range<usize> = 4..8;
    }

    pub mod index {
        //! Byte offsets inside one leaf index entry.
        use core::ops::Range;

        pub const KEY: Range<usize> = 0..2;
        pub const RESERVED: Range<usize> = 2..4;
        pub const OFFSET: Range<usize> = 4..8;
    }

    pub mod header {
        //! Byte offsets of the file header stored on the root page.
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        /// Managed page length; 0 stands for 64 KiB.
        pub const PAGE_LEN: Range<usize> = 6..8;
        pub const ALIGNMENT: Range<usize> = 8..10;
        /// 48-bit count of pages the file manages.
        pub const MANAGED_PAGES: Range<usize> = 10..16;
    }
}
