//! Spill-directory block-quota accounting.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct DirState {
    in_use: usize,
    reserved: usize,
}

/// One named spill location with a block quota. Mirrors the memory pool's
/// reservation protocol, counting file blocks on disk instead of memory
/// blocks. Invariant: `in_use + reserved <= quota`.
#[derive(Debug)]
pub struct TempDirectory {
    path: PathBuf,
    quota_blocks: usize,
    state: Mutex<DirState>,
}

impl TempDirectory {
    pub fn new(path: impl Into<PathBuf>, quota_blocks: usize) -> Self {
        Self {
            path: path.into(),
            quota_blocks,
            state: Mutex::new(DirState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn quota_blocks(&self) -> usize {
        self.quota_blocks
    }

    pub fn blocks_in_use(&self) -> usize {
        self.state.lock().in_use
    }

    pub fn blocks_reserved(&self) -> usize {
        self.state.lock().reserved
    }

    pub fn reserve(&self, n: usize) -> bool {
        let mut st = self.state.lock();
        if self.quota_blocks.saturating_sub(st.in_use + st.reserved) >= n {
            st.reserved += n;
            true
        } else {
            false
        }
    }

    pub fn unreserve(&self, n: usize) {
        let mut st = self.state.lock();
        debug_assert!(st.reserved >= n);
        st.reserved = st.reserved.saturating_sub(n);
    }

    /// Charges `n` blocks from the unreserved headroom; used when a temp file
    /// lazily touches a new on-disk block.
    pub fn take_into_use(&self, n: usize) -> bool {
        let mut st = self.state.lock();
        if self.quota_blocks.saturating_sub(st.in_use + st.reserved) >= n {
            st.in_use += n;
            true
        } else {
            false
        }
    }

    /// Converts `n` reserved blocks into in-use blocks.
    pub fn take_reserved(&self, n: usize) -> bool {
        let mut st = self.state.lock();
        if st.reserved >= n {
            st.reserved -= n;
            st.in_use += n;
            true
        } else {
            false
        }
    }

    pub fn release(&self, n: usize) {
        let mut st = self.state.lock();
        debug_assert!(st.in_use >= n);
        st.in_use = st.in_use.saturating_sub(n);
    }
}
