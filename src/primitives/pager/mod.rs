#![forbid(unsafe_code)]
//! Page-fixing seam between the allocator and an external pager.

mod frame;
mod mem;
mod store;

pub use mem::{MemPager, MemPagerStats};
pub use store::{FixMode, FixedPage, PageBuf, PageStore, ReplacementPriority};
