//! One paged, block-structured temp file.
//!
//! A TempFile owns an append position and a logical end-of-file, both byte
//! offsets, and exactly one in-memory page slot borrowed from the shared
//! memory pool while the file is open. Closing releases the page buffer and
//! the OS handle but keeps the on-disk content, the directory block charges
//! and the slot; this is how the engine keeps hundreds of logical temp files
//! live while bounding resident buffer memory to the reservation count.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{SortError, SortResult};
use crate::mem::{MemoryPool, PoolBlock};
use crate::temp::directory::TempDirectory;
use crate::temp::manager::TempFileManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Write,
    Read,
    Cursor,
    Closed,
}

#[derive(Debug)]
struct PageBuf {
    block: PoolBlock,
    block_no: u64,
    dirty: bool,
}

#[derive(Debug)]
pub struct TempFile {
    manager: TempFileManager,
    dir: Arc<TempDirectory>,
    pool: MemoryPool,
    path: PathBuf,
    slot: usize,
    block_size: usize,
    state: FileState,
    saved_state: FileState,
    file: Option<File>,
    page: Option<PageBuf>,
    scratch: Vec<u8>,
    scratch_at: u64,
    scratch_len: usize,
    pos: u64,
    eof: u64,
    blocks_charged: u64,
    phys_blocks: u64,
}

impl TempFile {
    pub(crate) fn create(
        manager: TempFileManager,
        dir: Arc<TempDirectory>,
        pool: MemoryPool,
        path: PathBuf,
        slot: usize,
    ) -> SortResult<Self> {
        let block_size = manager.block_size();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| SortError::from_write_io(e, &path))?;
        Ok(Self {
            manager,
            dir,
            pool,
            path,
            slot,
            block_size,
            state: FileState::Write,
            saved_state: FileState::Write,
            file: Some(file),
            page: None,
            scratch: Vec::new(),
            scratch_at: u64::MAX,
            scratch_len: 0,
            pos: 0,
            eof: 0,
            blocks_charged: 0,
            phys_blocks: 0,
        })
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn eof(&self) -> u64 {
        self.eof
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn is_closed(&self) -> bool {
        self.state == FileState::Closed
    }

    pub fn blocks_charged(&self) -> u64 {
        self.blocks_charged
    }

    /// Appends at the end-of-file position, transparently crossing block
    /// boundaries and lazily charging directory quota the first time each
    /// block is touched.
    pub fn append(&mut self, mut bytes: &[u8]) -> SortResult<()> {
        if self.state != FileState::Write {
            debug_assert!(false, "append outside WRITE state");
            return Err(SortError::InvalidState("append requires WRITE"));
        }
        let bs = self.block_size as u64;
        while !bytes.is_empty() {
            if self.eof == self.blocks_charged * bs {
                if !self.dir.take_into_use(1) {
                    log::warn!(
                        "temp-space quota exhausted in {}",
                        self.dir.path().display()
                    );
                    return Err(SortError::TempSpaceExhausted(
                        self.dir.path().display().to_string(),
                    ));
                }
                self.blocks_charged += 1;
            }
            let block_no = self.eof / bs;
            let off = (self.eof % bs) as usize;
            let take = (self.block_size - off).min(bytes.len());
            self.load_page(block_no)?;
            let page = self.page.as_mut().expect("page loaded");
            page.block.bytes_mut()[off..off + take].copy_from_slice(&bytes[..take]);
            page.dirty = true;
            self.eof += take as u64;
            bytes = &bytes[take..];
        }
        Ok(())
    }

    /// Enters read mode with the cursor at the beginning.
    pub fn start_read(&mut self) -> SortResult<()> {
        self.require_open("start_read")?;
        self.state = FileState::Read;
        self.pos = 0;
        self.scratch_at = u64::MAX;
        Ok(())
    }

    /// Enters cursor mode, keeping the current position.
    pub fn start_cursor(&mut self) -> SortResult<()> {
        self.require_open("start_cursor")?;
        self.state = FileState::Cursor;
        Ok(())
    }

    /// Returns the next `n` bytes at the cursor without advancing it, or
    /// `None` when the span would cross the logical end-of-file. Spans
    /// crossing a page boundary are assembled in a scratch buffer.
    pub fn peek(&mut self, n: usize) -> SortResult<Option<&[u8]>> {
        self.peek_at(self.pos, n)
    }

    /// Grows a prior `peek(old_n)` to `n` bytes, reusing the scratch span
    /// instead of restarting the assembly; used to read a length header and
    /// then the body once the length is known.
    pub fn peek_extend(&mut self, old_n: usize, n: usize) -> SortResult<Option<&[u8]>> {
        debug_assert!(old_n <= n);
        if self.pos + n as u64 > self.eof {
            return Ok(None);
        }
        let bs = self.block_size as u64;
        let first = self.pos / bs;
        let last = (self.pos + n as u64 - 1) / bs;
        if first == last {
            return self.peek_at(self.pos, n);
        }
        if self.scratch_at == self.pos && self.scratch_len >= old_n && self.scratch_len <= n {
            let start = self.pos + self.scratch_len as u64;
            let grow = n - self.scratch_len;
            self.fill_scratch_append(start, grow)?;
            self.scratch_len = n;
        } else {
            self.fill_scratch(self.pos, n)?;
        }
        Ok(Some(&self.scratch[..n]))
    }

    fn peek_at(&mut self, at: u64, n: usize) -> SortResult<Option<&[u8]>> {
        if self.state != FileState::Read && self.state != FileState::Cursor {
            debug_assert!(false, "peek outside READ/CURSOR state");
            return Err(SortError::InvalidState("peek requires READ or CURSOR"));
        }
        if at + n as u64 > self.eof {
            return Ok(None);
        }
        if n == 0 {
            return Ok(Some(&[]));
        }
        let bs = self.block_size as u64;
        let first = at / bs;
        let last = (at + n as u64 - 1) / bs;
        if first == last {
            self.load_page(first)?;
            let off = (at % bs) as usize;
            let page = self.page.as_ref().expect("page loaded");
            Ok(Some(&page.block.bytes()[off..off + n]))
        } else {
            self.fill_scratch(at, n)?;
            Ok(Some(&self.scratch[..n]))
        }
    }

    /// Moves the cursor by `delta` bytes. Fails without moving when the target
    /// would fall before the beginning or past the tracked end.
    pub fn move_by(&mut self, delta: i64) -> bool {
        let target = self.pos as i128 + delta as i128;
        if target < 0 || target > self.eof as i128 {
            return false;
        }
        self.pos = target as u64;
        true
    }

    pub fn move_to_begin(&mut self) {
        self.pos = 0;
    }

    pub fn move_to_end(&mut self) {
        self.pos = self.eof;
    }

    /// Releases the page buffer and the OS handle; content, positions,
    /// directory charges and the slot are all retained.
    pub fn close(&mut self) -> SortResult<()> {
        if self.state == FileState::Closed {
            return Ok(());
        }
        self.flush_page()?;
        self.page = None;
        self.file = None;
        self.saved_state = self.state;
        self.state = FileState::Closed;
        Ok(())
    }

    /// Reopens a closed file in the state it was closed in.
    pub fn open(&mut self) -> SortResult<()> {
        if self.state != FileState::Closed {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(SortError::from)?;
        self.file = Some(file);
        self.state = self.saved_state;
        Ok(())
    }

    /// Truncates to empty, releases all directory blocks and returns to WRITE.
    pub fn rewrite(&mut self) -> SortResult<()> {
        self.open()?;
        self.page = None;
        if let Some(f) = &self.file {
            f.set_len(0).map_err(SortError::from)?;
        }
        self.dir.release(self.blocks_charged as usize);
        self.blocks_charged = 0;
        self.phys_blocks = 0;
        self.pos = 0;
        self.eof = 0;
        self.scratch_at = u64::MAX;
        self.state = FileState::Write;
        self.saved_state = FileState::Write;
        Ok(())
    }

    fn require_open(&mut self, what: &'static str) -> SortResult<()> {
        if self.state == FileState::Closed {
            self.open()?;
        }
        if self.file.is_none() {
            return Err(SortError::InvalidState(what));
        }
        Ok(())
    }

    fn fill_scratch(&mut self, start: u64, len: usize) -> SortResult<()> {
        self.scratch.clear();
        self.scratch_at = start;
        self.scratch_len = len;
        self.fill_scratch_append(start, len)
    }

    fn fill_scratch_append(&mut self, mut at: u64, mut rem: usize) -> SortResult<()> {
        let bs = self.block_size as u64;
        while rem > 0 {
            let block_no = at / bs;
            let off = (at % bs) as usize;
            let take = (self.block_size - off).min(rem);
            self.load_page(block_no)?;
            let page = self.page.as_ref().expect("page loaded");
            self.scratch
                .extend_from_slice(&page.block.bytes()[off..off + take]);
            at += take as u64;
            rem -= take;
        }
        Ok(())
    }

    fn load_page(&mut self, block_no: u64) -> SortResult<()> {
        self.require_open("i/o on closed file")?;
        if self.page.is_none() {
            let block = self
                .pool
                .alloc_reserved()
                .or_else(|| self.pool.alloc())
                .ok_or(SortError::OutOfMemoryBlocks)?;
            self.page = Some(PageBuf {
                block,
                block_no: u64::MAX,
                dirty: false,
            });
        }
        if self.page.as_ref().expect("just set").block_no == block_no {
            return Ok(());
        }
        self.flush_page()?;
        let read_back = block_no < self.phys_blocks;
        let offset = block_no * self.block_size as u64;
        let file = self.file.as_mut().expect("open checked");
        let page = self.page.as_mut().expect("just set");
        if read_back {
            file.seek(SeekFrom::Start(offset)).map_err(SortError::from)?;
            file.read_exact(page.block.bytes_mut())
                .map_err(SortError::from)?;
        } else {
            page.block.bytes_mut().fill(0);
        }
        page.block_no = block_no;
        page.dirty = false;
        Ok(())
    }

    fn flush_page(&mut self) -> SortResult<()> {
        let Some(page) = &mut self.page else {
            return Ok(());
        };
        if !page.dirty {
            return Ok(());
        }
        let offset = page.block_no * self.block_size as u64;
        let file = self.file.as_mut().expect("dirty page implies open file");
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| SortError::from_write_io(e, &self.path))?;
        file.write_all(page.block.bytes())
            .map_err(|e| SortError::from_write_io(e, &self.path))?;
        self.phys_blocks = self.phys_blocks.max(page.block_no + 1);
        page.dirty = false;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.page = None;
        self.file = None;
        let _ = std::fs::remove_file(&self.path);
        self.dir.release(self.blocks_charged as usize);
        self.manager.free_slot(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp::directory::TempDirectory;
    use crate::temp::manager::TempFileManager;

    fn setup(block_size: usize, quota: usize) -> (tempfile::TempDir, MemoryPool, TempFileManager) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = MemoryPool::new(block_size, 16);
        let mgr = TempFileManager::new(
            vec![TempDirectory::new(tmp.path(), quota)],
            block_size,
            16,
            1,
        )
        .unwrap();
        (tmp, pool, mgr)
    }

    #[test]
    fn append_and_peek_across_blocks() {
        let (_tmp, pool, mgr) = setup(32, 64);
        let mut f = mgr.create_file(&pool).unwrap();
        let data: Vec<u8> = (0..100).collect();
        f.append(&data).unwrap();
        assert_eq!(f.eof(), 100);
        assert_eq!(f.blocks_charged(), 4);

        f.start_read().unwrap();
        // Span within one block.
        assert_eq!(f.peek(8).unwrap().unwrap(), &data[..8]);
        // Span crossing two block boundaries, assembled in scratch.
        assert!(f.move_by(30));
        assert_eq!(f.peek(40).unwrap().unwrap(), &data[30..70]);
        // Crossing logical EOF yields no data.
        assert!(f.move_by(60));
        assert_eq!(f.pos(), 90);
        assert!(f.peek(11).unwrap().is_none());
        assert_eq!(f.peek(10).unwrap().unwrap(), &data[90..]);
    }

    #[test]
    fn peek_extend_grows_span() {
        let (_tmp, pool, mgr) = setup(32, 64);
        let mut f = mgr.create_file(&pool).unwrap();
        let data: Vec<u8> = (0..96).map(|i| i as u8).collect();
        f.append(&data).unwrap();
        f.start_read().unwrap();
        assert!(f.move_by(30));
        assert_eq!(f.peek(4).unwrap().unwrap(), &data[30..34]);
        assert_eq!(f.peek_extend(4, 50).unwrap().unwrap(), &data[30..80]);
        assert_eq!(f.peek_extend(50, 60).unwrap().unwrap(), &data[30..90]);
        assert!(f.peek_extend(60, 70).unwrap().is_none());
    }

    #[test]
    fn move_by_bounds() {
        let (_tmp, pool, mgr) = setup(32, 64);
        let mut f = mgr.create_file(&pool).unwrap();
        f.append(&[1, 2, 3]).unwrap();
        f.start_read().unwrap();
        assert!(!f.move_by(-1));
        assert_eq!(f.pos(), 0);
        assert!(f.move_by(3));
        assert!(!f.move_by(1));
        assert_eq!(f.pos(), 3);
        f.move_to_begin();
        assert_eq!(f.pos(), 0);
        f.move_to_end();
        assert_eq!(f.pos(), 3);
    }

    #[test]
    fn close_open_keeps_content_and_position() {
        let (_tmp, pool, mgr) = setup(32, 64);
        let mut f = mgr.create_file(&pool).unwrap();
        let data: Vec<u8> = (0..80).collect();
        f.append(&data).unwrap();
        f.start_read().unwrap();
        assert!(f.move_by(40));

        f.close().unwrap();
        assert!(f.is_closed());
        assert_eq!(pool.in_use(), 0, "page buffer released on close");

        f.open().unwrap();
        assert_eq!(f.pos(), 40);
        assert_eq!(f.peek(40).unwrap().unwrap(), &data[40..]);
    }

    #[test]
    fn quota_exhaustion_is_clean() {
        let (_tmp, pool, mgr) = setup(32, 2);
        let mut f = mgr.create_file(&pool).unwrap();
        f.append(&[0u8; 64]).unwrap();
        let err = f.append(&[0u8; 1]).unwrap_err();
        assert!(matches!(err, SortError::TempSpaceExhausted(_)));
        // Earlier content still intact.
        f.start_read().unwrap();
        assert_eq!(f.peek(64).unwrap().unwrap().len(), 64);
    }

    #[test]
    fn rewrite_releases_quota() {
        let (_tmp, pool, mgr) = setup(32, 4);
        let dir = mgr.directories()[0].clone();
        let mut f = mgr.create_file(&pool).unwrap();
        f.append(&[7u8; 100]).unwrap();
        assert_eq!(dir.blocks_in_use(), 4);
        f.rewrite().unwrap();
        assert_eq!(dir.blocks_in_use(), 0);
        assert_eq!(f.eof(), 0);
        f.append(&[1u8; 10]).unwrap();
        f.start_read().unwrap();
        assert_eq!(f.peek(10).unwrap().unwrap(), &[1u8; 10]);
    }

    #[test]
    fn drop_releases_quota_and_slot() {
        let (_tmp, pool, mgr) = setup(32, 8);
        let dir = mgr.directories()[0].clone();
        {
            let mut f = mgr.create_file(&pool).unwrap();
            f.append(&[0u8; 200]).unwrap();
            assert!(dir.blocks_in_use() > 0);
            assert_eq!(mgr.slots_in_use(), 1);
        }
        assert_eq!(dir.blocks_in_use(), 0);
        assert_eq!(mgr.slots_in_use(), 0);
        assert_eq!(pool.in_use(), 0);
    }
}
