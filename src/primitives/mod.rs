//! Low-level primitives the allocator is built on.

/// Little-endian field access on raw page bytes.
pub mod bytes;

/// Page-fixing seam towards the external pager.
///
/// Defines the fix/unfix contract and an in-memory implementation.
pub mod pager;
