use parking_lot::RwLock;
use std::sync::Arc;

use super::store::PageBuf;

/// One page slot of the in-memory store.
pub(crate) struct Frame {
    pub buf: PageBuf,
    /// Image taken at the first writable fix, restored on a clean unfix.
    pub before: Option<Box<[u8]>>,
    pub pin_count: u32,
    pub writers: u32,
}

impl Frame {
    pub fn new(page_size: usize) -> Self {
        Self {
            buf: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
            before: None,
            pin_count: 0,
            writers: 0,
        }
    }

    /// Snapshots the current bytes unless a writer already holds one.
    pub fn begin_write(&mut self) {
        if self.before.is_none() {
            self.before = Some(self.buf.read().clone());
        }
        self.writers += 1;
    }

    /// Ends one writable fix, keeping or rolling back its changes.
    pub fn end_write(&mut self, keep: bool) {
        self.writers = self.writers.saturating_sub(1);
        if keep {
            self.before = None;
            return;
        }
        if let Some(image) = self.before.take() {
            self.buf.write().copy_from_slice(&image);
        }
    }

    pub fn zero(&mut self) {
        self.buf.write().fill(0);
    }
}
