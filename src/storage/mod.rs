//! Area allocation engine.
//!
//! Leaf pages hold variable-length areas behind a slot index; summary pages
//! record each leaf's free size so the allocator finds room without a scan.

/// Attached areas and their byte access.
mod area;
mod cache;
mod file;

/// Page size, alignment, and derived limits of a file.
pub mod layout;

pub mod leaf;

mod metrics;
mod options;
mod pages;

pub mod tree;

/// An attached area.
pub use area::Area;
/// Shared handle to a page attached by a file.
pub use cache::PageHandle;
/// The area file façade.
pub use file::AreaFile;
pub use layout::FileLayout;
pub use metrics::{default_metrics, AreaMetrics, CounterMetrics, CounterSnapshot, NoopMetrics};
pub use options::{AreaFileOptions, DEFAULT_MAX_CACHED_READ_ONLY};
