//! Fixed-block memory pool with explicit reservation accounting.
//!
//! The pool bounds the sort subsystem's RAM footprint in blocks, not bytes.
//! A sorter reserves its peak block budget up front; allocations then draw on
//! the reservation, and freeing a reserved block returns the unit to the
//! reservation, so a sorter's total claim stays constant until it explicitly
//! unreserves. One coarse lock serializes all operations: the unit of
//! contention is a counter update, never the block contents.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct PoolState {
    in_use: usize,
    reserved: usize,
    reserved_on_free: usize,
    freelist: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct PoolInner {
    block_size: usize,
    max_blocks: usize,
    state: Mutex<PoolState>,
}

/// Shared handle to one block pool. Clones share the same accounting.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    pub fn new(block_size: usize, max_blocks: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                block_size,
                max_blocks,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn max_blocks(&self) -> usize {
        self.inner.max_blocks
    }

    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }

    pub fn reserved(&self) -> usize {
        self.inner.state.lock().reserved
    }

    /// Reserves `n` blocks out of the unclaimed headroom. Succeeds only if
    /// `max - in_use - reserved >= n`.
    pub fn reserve(&self, n: usize) -> bool {
        let mut st = self.inner.state.lock();
        if self.inner.max_blocks.saturating_sub(st.in_use + st.reserved) >= n {
            st.reserved += n;
            true
        } else {
            false
        }
    }

    /// Claims `n` blocks that will become available as currently allocated
    /// blocks are freed. Succeeds only if `in_use - reserved_on_free >= n`;
    /// you cannot pre-claim more blocks than exist to be freed.
    pub fn reserve_on_free(&self, n: usize) -> bool {
        let mut st = self.inner.state.lock();
        if st.in_use.saturating_sub(st.reserved_on_free) >= n {
            st.reserved_on_free += n;
            true
        } else {
            false
        }
    }

    pub fn unreserve(&self, n: usize) {
        let mut st = self.inner.state.lock();
        debug_assert!(st.reserved >= n, "unreserve below zero");
        st.reserved = st.reserved.saturating_sub(n);
    }

    /// Allocates one block against an outstanding reservation. Returns `None`
    /// when no reservation unit is available; callers treat that as a
    /// recoverable insufficient-resources condition.
    pub fn alloc_reserved(&self) -> Option<PoolBlock> {
        let mut st = self.inner.state.lock();
        if st.reserved == 0 {
            return None;
        }
        st.reserved -= 1;
        st.in_use += 1;
        let buf = self.take_buf(&mut st);
        Some(PoolBlock {
            pool: self.inner.clone(),
            buf: Some(buf),
            from_reservation: true,
        })
    }

    /// Allocates one block from the unreserved headroom.
    pub fn alloc(&self) -> Option<PoolBlock> {
        let mut st = self.inner.state.lock();
        if st.in_use + st.reserved >= self.inner.max_blocks {
            return None;
        }
        st.in_use += 1;
        let buf = self.take_buf(&mut st);
        Some(PoolBlock {
            pool: self.inner.clone(),
            buf: Some(buf),
            from_reservation: false,
        })
    }

    fn take_buf(&self, st: &mut PoolState) -> Vec<u8> {
        st.freelist
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.block_size])
    }
}

/// RAII handle to one pool block; freeing happens on drop. A pending
/// reserve-on-free claim converts to a firm reservation the moment any block
/// is freed; otherwise a reserved allocation returns its unit to `reserved`.
#[derive(Debug)]
pub struct PoolBlock {
    pool: Arc<PoolInner>,
    buf: Option<Vec<u8>>,
    from_reservation: bool,
}

impl PoolBlock {
    pub fn bytes(&self) -> &[u8] {
        self.buf.as_ref().expect("block already freed")
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("block already freed")
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        let Some(mut buf) = self.buf.take() else {
            return;
        };
        let mut st = self.pool.state.lock();
        st.in_use -= 1;
        if st.reserved_on_free > 0 {
            st.reserved_on_free -= 1;
            st.reserved += 1;
        } else if self.from_reservation {
            st.reserved += 1;
        }
        if st.freelist.len() < self.pool.max_blocks {
            buf.clear();
            buf.resize(self.pool.block_size, 0);
            st.freelist.push(buf);
        }
    }
}
