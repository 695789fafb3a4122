//! Run-structured sequential view over one temp file.
//!
//! A stream accumulates zero or more runs, each a sorted record sequence
//! closed by the one-byte EOR sentinel. Reading is bidirectional: the cursor
//! always sits between records, so switching direction re-yields the record
//! just visited and never skips or duplicates one. Dummy runs injected for
//! polyphase balancing occupy no file bytes; they are served as `Hold` status
//! ahead of the real data and consumed by `skip_eor` like a real run
//! boundary.

pub mod array;

pub use array::{Distribution, StreamArray};

use crate::error::{SortError, SortResult};
use crate::temp::TempFile;
use crate::vtuple::{
    self, header_size_from_first, read_len, read_len_mirrored, EOR_BYTE, MAX_RECORD_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// A record was produced; it is available via `current()`.
    Run,
    /// The cursor sits at an end-of-run sentinel; call `skip_eor`.
    Eor,
    /// A dummy run is pending; call `skip_eor` to consume it.
    Hold,
    /// Forward end of stream.
    Eos,
    /// Backward beginning of stream.
    Bos,
    /// The stream hit a framing error and is unusable.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadDirection {
    None,
    Forward,
    Backward,
}

#[derive(Debug)]
pub struct Stream {
    file: TempFile,
    run_count: usize,
    dummy_runs: usize,
    pending_dummy: usize,
    direction: ReadDirection,
    status: StreamStatus,
    cur: Vec<u8>,
    frame_buf: Vec<u8>,
}

impl Stream {
    pub fn new(file: TempFile) -> Self {
        Self {
            file,
            run_count: 0,
            dummy_runs: 0,
            pending_dummy: 0,
            direction: ReadDirection::None,
            status: StreamStatus::Bos,
            cur: Vec::new(),
            frame_buf: Vec::new(),
        }
    }

    pub fn run_count(&self) -> usize {
        self.run_count
    }

    pub fn dummy_runs(&self) -> usize {
        self.dummy_runs
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// The record produced by the last `get_next`/`get_prev` that returned
    /// `Run`.
    pub fn current(&self) -> &[u8] {
        &self.cur
    }

    pub fn is_empty(&self) -> bool {
        self.file.eof() == 0 && self.dummy_runs == 0
    }

    /// True when a forward reader has consumed every record and every pending
    /// dummy run; lets the merge detect exhaustion at a run boundary without
    /// reading into the next run.
    pub fn at_end(&self) -> bool {
        self.pending_dummy == 0 && self.file.pos() == self.file.eof()
    }

    /// Appends one framed record (length prefix, body, mirrored trailing
    /// length) at the end of the file.
    pub fn append_record(&mut self, body: &[u8]) -> SortResult<()> {
        debug_assert!(!body.is_empty(), "records are never zero bytes long");
        if body.len() > MAX_RECORD_LEN {
            return Err(SortError::RowTooLong {
                got: body.len(),
                limit: MAX_RECORD_LEN,
            });
        }
        self.file.open()?;
        self.frame_buf.clear();
        vtuple::write_len(&mut self.frame_buf, body.len());
        self.frame_buf.extend_from_slice(body);
        vtuple::write_len_mirrored(&mut self.frame_buf, body.len());
        let frame = std::mem::take(&mut self.frame_buf);
        let res = self.file.append(&frame);
        self.frame_buf = frame;
        res
    }

    /// Closes the current run with the EOR sentinel.
    pub fn set_eor_at_end(&mut self) -> SortResult<()> {
        self.file.open()?;
        self.file.append(&[EOR_BYTE])?;
        self.run_count += 1;
        Ok(())
    }

    /// Injects `n` dummy (empty) runs for polyphase balancing.
    pub fn add_dummy_runs(&mut self, n: usize) {
        self.dummy_runs += n;
    }

    /// Enters read mode with the cursor at the beginning; pending dummy runs
    /// are re-armed.
    pub fn init_fetch(&mut self) -> SortResult<()> {
        self.file.open()?;
        self.file.start_read()?;
        self.pending_dummy = self.dummy_runs;
        self.direction = ReadDirection::None;
        self.status = StreamStatus::Bos;
        Ok(())
    }

    pub fn rewind(&mut self) -> SortResult<()> {
        self.init_fetch()
    }

    /// Switches the underlying file into cursor mode for result traversal.
    pub fn start_cursor(&mut self) -> SortResult<()> {
        self.file.open()?;
        self.file.start_cursor()?;
        Ok(())
    }

    pub fn cursor_to_begin(&mut self) {
        self.file.move_to_begin();
        self.direction = ReadDirection::None;
    }

    pub fn cursor_to_end(&mut self) {
        self.file.move_to_end();
        self.direction = ReadDirection::None;
    }

    /// Truncates the underlying file and resets all run accounting.
    pub fn rewrite(&mut self) -> SortResult<()> {
        self.file.rewrite()?;
        self.run_count = 0;
        self.dummy_runs = 0;
        self.pending_dummy = 0;
        self.direction = ReadDirection::None;
        self.status = StreamStatus::Bos;
        Ok(())
    }

    pub fn close(&mut self) -> SortResult<()> {
        self.file.close()
    }

    pub fn open(&mut self) -> SortResult<()> {
        self.file.open()
    }

    /// Reads the record after the cursor and advances past it.
    pub fn get_next(&mut self) -> SortResult<StreamStatus> {
        self.direction = ReadDirection::Forward;
        if self.pending_dummy > 0 {
            self.status = StreamStatus::Hold;
            return Ok(StreamStatus::Hold);
        }
        let Some(head) = self.file.peek(1)? else {
            self.status = StreamStatus::Eos;
            return Ok(StreamStatus::Eos);
        };
        let first = head[0];
        if first == EOR_BYTE {
            self.status = StreamStatus::Eor;
            return Ok(StreamStatus::Eor);
        }
        let hdr = header_size_from_first(first);
        let pos = self.file.pos();
        let Some(head) = self.file.peek_extend(1, hdr)? else {
            self.status = StreamStatus::Error;
            return Err(SortError::Corrupt(pos));
        };
        let (len, _) = read_len(head)?;
        let Some(framed) = self.file.peek_extend(hdr, hdr + len)? else {
            self.status = StreamStatus::Error;
            return Err(SortError::Corrupt(pos));
        };
        self.cur.clear();
        self.cur.extend_from_slice(&framed[hdr..]);
        if !self.file.move_by((hdr + len + hdr) as i64) {
            self.status = StreamStatus::Error;
            return Err(SortError::Corrupt(pos));
        }
        self.status = StreamStatus::Run;
        Ok(StreamStatus::Run)
    }

    /// Reads the record before the cursor and moves back before it. The
    /// trailing mirrored length is located by peeking backward from the
    /// cursor, so no record index is needed.
    pub fn get_prev(&mut self) -> SortResult<StreamStatus> {
        debug_assert!(self.dummy_runs == 0, "backward read on a balanced merge input");
        self.direction = ReadDirection::Backward;
        let end = self.file.pos();
        if end == 0 {
            self.status = StreamStatus::Bos;
            return Ok(StreamStatus::Bos);
        }
        self.file.move_by(-1);
        let last = {
            let Some(b) = self.file.peek(1)? else {
                self.status = StreamStatus::Error;
                return Err(SortError::Corrupt(end));
            };
            b[0]
        };
        self.file.move_by(1);
        if last == EOR_BYTE {
            self.status = StreamStatus::Eor;
            return Ok(StreamStatus::Eor);
        }
        let hdr = header_size_from_first(last);
        if end < hdr as u64 {
            self.status = StreamStatus::Error;
            return Err(SortError::Corrupt(end));
        }
        self.file.move_by(-(hdr as i64));
        let len = {
            let Some(tail) = self.file.peek(hdr)? else {
                self.status = StreamStatus::Error;
                return Err(SortError::Corrupt(end));
            };
            let (len, _) = read_len_mirrored(tail)?;
            len
        };
        let total = (2 * hdr + len) as u64;
        if end < total {
            self.status = StreamStatus::Error;
            return Err(SortError::Corrupt(end));
        }
        // Position at the body start, copy it out, then park the cursor at
        // the frame start.
        self.file.move_by(hdr as i64);
        self.file.move_by(-((hdr + len) as i64));
        {
            let Some(body) = self.file.peek(len)? else {
                self.status = StreamStatus::Error;
                return Err(SortError::Corrupt(end));
            };
            self.cur.clear();
            self.cur.extend_from_slice(body);
        }
        self.file.move_by(-(hdr as i64));
        self.status = StreamStatus::Run;
        Ok(StreamStatus::Run)
    }

    /// Consumes the EOR sentinel (or one pending dummy-run unit) in the
    /// current read direction.
    pub fn skip_eor(&mut self) -> SortResult<()> {
        match self.direction {
            ReadDirection::Backward => {
                if !self.file.move_by(-1) {
                    return Err(SortError::InvalidState("skip_eor before beginning"));
                }
                Ok(())
            }
            _ => {
                if self.pending_dummy > 0 {
                    self.pending_dummy -= 1;
                    return Ok(());
                }
                let at_eor = matches!(self.file.peek(1)?, Some([EOR_BYTE]));
                if !at_eor {
                    debug_assert!(false, "skip_eor without a pending EOR");
                    return Err(SortError::InvalidState("skip_eor without EOR"));
                }
                self.file.move_by(1);
                Ok(())
            }
        }
    }
}
