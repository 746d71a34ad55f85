use std::fmt;
use std::sync::Arc;

use crate::types::page::DEFAULT_ALIGNMENT;

/// Read-only pages kept fixed while unreferenced before the oldest is released.
pub const DEFAULT_MAX_CACHED_READ_ONLY: usize = 3;

/// Configuration options supplied when creating or opening an [`super::AreaFile`].
#[derive(Clone)]
pub struct AreaFileOptions {
    /// Page size to manage, capped at the store's page size.
    pub page_size: Option<u32>,
    /// Alignment every area size is rounded up to. Must be a power of two.
    pub alignment: u32,
    /// Unreferenced read-only pages kept fixed per cache.
    pub max_cached_read_only: usize,
    /// Whether allocations skip the free-space search and only use the last page.
    pub batch_insert: bool,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn super::metrics::AreaMetrics>>,
}

impl AreaFileOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self {
            page_size: None,
            alignment: DEFAULT_ALIGNMENT,
            max_cached_read_only: DEFAULT_MAX_CACHED_READ_ONLY,
            batch_insert: false,
            metrics: None,
        }
    }

    /// Limits the managed page size.
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = Some(bytes);
        self
    }

    /// Sets the area size alignment.
    pub fn alignment(mut self, bytes: u32) -> Self {
        self.alignment = bytes;
        self
    }

    /// Sets how many unreferenced read-only pages stay fixed.
    pub fn max_cached_read_only(mut self, pages: usize) -> Self {
        self.max_cached_read_only = pages;
        self
    }

    /// Enables or disables batch insertion.
    pub fn batch_insert(mut self, enabled: bool) -> Self {
        self.batch_insert = enabled;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn super::metrics::AreaMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Default for AreaFileOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AreaFileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AreaFileOptions")
            .field("page_size", &self.page_size)
            .field("alignment", &self.alignment)
            .field("max_cached_read_only", &self.max_cached_read_only)
            .field("batch_insert", &self.batch_insert)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
