//! Variable-length area allocation over fixed-size pages.
//!
//! An [`AreaFile`](storage::AreaFile) carves areas out of leaf pages supplied
//! by an external [`PageStore`](primitives::pager::PageStore) and keeps a
//! three-step summary of every leaf's free space, so a page with room for a
//! new area is found without scanning the file.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;
