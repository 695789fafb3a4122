//! Temp-file manager: file-slot bitmap, directory round-robin, naming.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constants::{TEMP_FILE_EXTENSION, TEMP_FILE_PREFIX};
use crate::error::{SortError, SortResult};
use crate::mem::MemoryPool;
use crate::temp::directory::TempDirectory;
use crate::temp::file::TempFile;

#[derive(Debug)]
struct SlotBitmap {
    words: Vec<u64>,
    capacity: usize,
}

impl SlotBitmap {
    fn new(capacity: usize) -> Self {
        Self {
            words: vec![0u64; capacity.div_ceil(64)],
            capacity,
        }
    }

    fn alloc(&mut self) -> Option<usize> {
        for (wi, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let slot = wi * 64 + bit;
                if slot >= self.capacity {
                    return None;
                }
                *word |= 1u64 << bit;
                return Some(slot);
            }
        }
        None
    }

    fn free(&mut self, slot: usize) {
        debug_assert!(slot < self.capacity);
        let mask = 1u64 << (slot % 64);
        debug_assert!(self.words[slot / 64] & mask != 0, "double free of file slot");
        self.words[slot / 64] &= !mask;
    }
}

#[derive(Debug)]
pub(crate) struct ManagerInner {
    dirs: Vec<Arc<TempDirectory>>,
    block_size: usize,
    instance_id: u32,
    slots: Mutex<SlotBitmap>,
}

/// Shared handle to the temp-file manager, one per database instance. Slot
/// indices are manager-wide and round-robin across directories by
/// `slot % dir_count`; a slot is reused only after its owning file is
/// destroyed.
#[derive(Debug, Clone)]
pub struct TempFileManager {
    inner: Arc<ManagerInner>,
}

impl TempFileManager {
    pub fn new(
        dirs: Vec<TempDirectory>,
        block_size: usize,
        max_files_total: usize,
        instance_id: u32,
    ) -> SortResult<Self> {
        if dirs.is_empty() {
            return Err(SortError::Config("no temp directories configured".into()));
        }
        Ok(Self {
            inner: Arc::new(ManagerInner {
                dirs: dirs.into_iter().map(Arc::new).collect(),
                block_size,
                instance_id,
                slots: Mutex::new(SlotBitmap::new(max_files_total)),
            }),
        })
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn directories(&self) -> &[Arc<TempDirectory>] {
        &self.inner.dirs
    }

    pub fn slots_in_use(&self) -> usize {
        let bm = self.inner.slots.lock();
        bm.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Creates a new empty temp file on the next free slot.
    pub fn create_file(&self, pool: &MemoryPool) -> SortResult<TempFile> {
        let slot = self
            .inner
            .slots
            .lock()
            .alloc()
            .ok_or(SortError::OutOfFileSlots)?;
        let dir = self.inner.dirs[slot % self.inner.dirs.len()].clone();
        let path = self.file_path(&dir, slot);
        match TempFile::create(self.clone(), dir, pool.clone(), path, slot) {
            Ok(f) => Ok(f),
            Err(e) => {
                self.free_slot(slot);
                Err(e)
            }
        }
    }

    pub(crate) fn free_slot(&self, slot: usize) {
        self.inner.slots.lock().free(slot);
    }

    fn file_path(&self, dir: &TempDirectory, slot: usize) -> PathBuf {
        dir.path().join(format!(
            "{}{:08x}_{:05}{}",
            TEMP_FILE_PREFIX, self.inner.instance_id, slot, TEMP_FILE_EXTENSION
        ))
    }
}
