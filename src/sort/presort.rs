//! In-memory presort: run generation from pool-backed row buffers.

use std::cmp::Ordering;

use crate::constants::INSERTION_SORT_CUTOFF;
use crate::error::{SortError, SortResult};
use crate::mem::{MemoryPool, PoolBlock};
use crate::stream::StreamArray;
use crate::tuple::{RecordComparator, Row};

/// Locator of one serialized record inside the presort buffers.
#[derive(Debug, Clone, Copy)]
struct RecSlot {
    buf: u32,
    off: u32,
    len: u32,
}

/// Accumulates rows into fixed-size pool blocks, quicksorts each full batch
/// in place and spills it as one run to the stream selected by the
/// [`StreamArray`].
#[derive(Debug)]
pub struct Presorter {
    cmp: RecordComparator,
    block_size: usize,
    buffers: Vec<PoolBlock>,
    used: Vec<usize>,
    cur: usize,
    recs: Vec<RecSlot>,
    encode_buf: Vec<u8>,
}

impl Presorter {
    /// Allocates `max_buffers` blocks against the sorter's pool reservation.
    pub fn new(
        cmp: RecordComparator,
        pool: &MemoryPool,
        max_buffers: usize,
    ) -> SortResult<Self> {
        debug_assert!(max_buffers >= 1);
        let mut buffers = Vec::with_capacity(max_buffers);
        for _ in 0..max_buffers {
            buffers.push(pool.alloc_reserved().ok_or(SortError::OutOfMemoryBlocks)?);
        }
        let used = vec![0usize; buffers.len()];
        Ok(Self {
            cmp,
            block_size: pool.block_size(),
            buffers,
            used,
            cur: 0,
            recs: Vec::new(),
            encode_buf: Vec::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.recs.is_empty()
    }

    pub fn rows_buffered(&self) -> usize {
        self.recs.len()
    }

    /// Serializes `row` into the current buffer, spilling a sorted run first
    /// when all buffers are full.
    pub fn add_row(&mut self, row: &Row, array: &mut StreamArray) -> SortResult<()> {
        row.encode_into(&mut self.encode_buf);
        let len = self.encode_buf.len();
        if len > self.block_size {
            // Not even an empty buffer could hold it.
            return Err(SortError::RowTooLong {
                got: len,
                limit: self.block_size,
            });
        }
        if self.used[self.cur] + len > self.block_size {
            self.cur += 1;
            if self.cur == self.buffers.len() {
                self.flush(array)?;
            }
        }
        let off = self.used[self.cur];
        self.buffers[self.cur].bytes_mut()[off..off + len].copy_from_slice(&self.encode_buf);
        self.recs.push(RecSlot {
            buf: self.cur as u32,
            off: off as u32,
            len: len as u32,
        });
        self.used[self.cur] += len;
        Ok(())
    }

    /// Sorts the buffered records and writes them as one run to the next
    /// distribution stream. No-op when nothing is buffered.
    pub fn flush(&mut self, array: &mut StreamArray) -> SortResult<bool> {
        if self.recs.is_empty() {
            self.cur = 0;
            return Ok(false);
        }
        {
            let buffers = &self.buffers;
            let cmp = &self.cmp;
            // Records were encoded by this presorter, so comparison cannot
            // fail on framing.
            quicksort(&mut self.recs, &|a, b| {
                cmp.compare(slot_slice(buffers, a), slot_slice(buffers, b))
                    .unwrap_or(Ordering::Equal)
            });
        }
        let idx = array.next_stream()?;
        let stream = array.stream_mut(idx);
        for slot in &self.recs {
            stream.append_record(slot_slice(&self.buffers, slot))?;
        }
        stream.set_eor_at_end()?;
        log::trace!(
            "presort spilled run of {} records to stream {}",
            self.recs.len(),
            idx
        );
        self.recs.clear();
        self.used.fill(0);
        self.cur = 0;
        Ok(true)
    }
}

fn slot_slice<'a>(buffers: &'a [PoolBlock], slot: &RecSlot) -> &'a [u8] {
    let off = slot.off as usize;
    &buffers[slot.buf as usize].bytes()[off..off + slot.len as usize]
}

fn insertion_sort<T, F>(v: &mut [T], cmp: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    for i in 1..v.len() {
        let mut j = i;
        while j > 0 && cmp(&v[j - 1], &v[j]) == Ordering::Greater {
            v.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// In-place quicksort with median-of-three pivot selection. Small partitions
/// go straight to insertion sort, as does any partition whose partitioning
/// pass performed no swaps: that shape is a mostly-ordered input, where naive
/// quicksort degrades quadratically.
pub(crate) fn quicksort<T, F>(mut v: &mut [T], cmp: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    loop {
        let n = v.len();
        if n <= INSERTION_SORT_CUTOFF {
            insertion_sort(v, cmp);
            return;
        }
        let mid = n / 2;
        if cmp(&v[mid], &v[0]) == Ordering::Less {
            v.swap(mid, 0);
        }
        if cmp(&v[n - 1], &v[0]) == Ordering::Less {
            v.swap(n - 1, 0);
        }
        if cmp(&v[n - 1], &v[mid]) == Ordering::Less {
            v.swap(n - 1, mid);
        }
        // Median of three at v[0]; v[n-1] bounds the right scan.
        v.swap(0, mid);

        let mut i = 0usize;
        let mut j = n;
        let mut swaps = 0usize;
        loop {
            i += 1;
            while i < n && cmp(&v[i], &v[0]) == Ordering::Less {
                i += 1;
            }
            j -= 1;
            while j > 0 && cmp(&v[j], &v[0]) == Ordering::Greater {
                j -= 1;
            }
            if i >= j {
                break;
            }
            v.swap(i, j);
            swaps += 1;
        }
        v.swap(0, j);

        if swaps == 0 {
            insertion_sort(v, cmp);
            return;
        }

        let (lo, rest) = v.split_at_mut(j);
        let hi = &mut rest[1..];
        // Recurse into the smaller side, loop on the larger one.
        if lo.len() < hi.len() {
            quicksort(lo, cmp);
            v = hi;
        } else {
            quicksort(hi, cmp);
            v = lo;
        }
    }
}

#[cfg(test)]
mod quicksort_tests {
    use super::*;

    fn check(mut v: Vec<i32>) {
        let mut expect = v.clone();
        expect.sort();
        quicksort(&mut v, &|a, b| a.cmp(b));
        assert_eq!(v, expect);
    }

    #[test]
    fn sorts_random_patterns() {
        check(vec![]);
        check(vec![1]);
        check(vec![3, 1, 2]);
        check((0..100).rev().collect());
        check((0..100).collect());
        check(vec![5; 40]);
        let mut mixed: Vec<i32> = (0..57).map(|i| (i * 31 + 7) % 23).collect();
        mixed.extend_from_slice(&[9, 9, 9, -4, 100]);
        check(mixed);
    }

    #[test]
    fn sorted_input_stays_sorted() {
        // Exercises the no-swap partition guard.
        check((0..1000).collect());
        check((0..1000).rev().collect());
    }
}
