//! Top-level sort façade and state machine.
//!
//! A Sorter is created per sort operation, reserves its peak block budget up
//! front and only shrinks that reservation as phases complete. The first
//! fatal error latches: the sorter enters ERROR and replays the same error on
//! every later call until destroyed. Destruction at any phase releases all
//! memory blocks, file slots and directory quota through RAII.

use crate::config::SortConfig;
use crate::error::{SortError, SortResult};
use crate::mem::MemoryPool;
use crate::sort::merge::{MergeEngine, MergeStep};
use crate::sort::presort::{quicksort, Presorter};
use crate::stream::{Distribution, StreamArray, StreamStatus};
use crate::temp::TempFileManager;
use crate::tuple::{OrderSpec, RecordComparator, Row, TupleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SorterState {
    Init,
    Add,
    Merge,
    Cursor,
    /// No ordering requested: rows pass through one stream unsorted.
    InitNoOrder,
    AddNoOrder,
    Error,
}

/// Heap-only backing used when the external sorter is disabled.
#[derive(Debug, Default)]
struct MemSort {
    rows: Vec<Vec<u8>>,
    pos: usize,
}

#[derive(Debug)]
pub struct Sorter {
    schema: TupleType,
    cmp: RecordComparator,
    pool: MemoryPool,
    reservation: usize,
    file_count: usize,
    merge_step_bytes: usize,
    merge_step_rows: usize,
    presorter: Option<Presorter>,
    array: Option<StreamArray>,
    merge: Option<MergeEngine>,
    mem: Option<MemSort>,
    result_idx: Option<usize>,
    state: SorterState,
    error: Option<SortError>,
    encode_buf: Vec<u8>,
}

impl Sorter {
    pub fn new(
        schema: TupleType,
        order: Vec<OrderSpec>,
        config: &SortConfig,
        pool: MemoryPool,
        temp: TempFileManager,
    ) -> SortResult<Self> {
        config
            .validate()
            .map_err(|e| SortError::Config(e.to_string()))?;
        // A key column outside the schema would make every comparison fail;
        // reject it here instead of producing an unsorted "success".
        for key in &order {
            if key.column >= schema.attr_count() {
                return Err(SortError::Config(format!(
                    "order column {} out of range for schema with {} attributes",
                    key.column,
                    schema.attr_count()
                )));
            }
        }
        let cmp = RecordComparator::new(order);
        let ordered = !cmp.is_trivial();
        let init_state = if ordered {
            SorterState::Init
        } else {
            SorterState::InitNoOrder
        };

        if !config.enabled {
            log::debug!("external sorter disabled, using in-memory sort");
            return Ok(Self {
                schema,
                cmp,
                pool,
                reservation: 0,
                file_count: 0,
                merge_step_bytes: config.merge_step_bytes,
                merge_step_rows: config.merge_step_rows,
                presorter: None,
                array: None,
                merge: None,
                mem: Some(MemSort::default()),
                result_idx: None,
                state: init_state,
                error: None,
                encode_buf: Vec::new(),
            });
        }

        let total = config.sort_blocks();
        let file_count = config.max_files_per_sort;
        if !pool.reserve(total) {
            return Err(SortError::OutOfMemoryBlocks);
        }
        let built: SortResult<(StreamArray, Option<Presorter>)> = (|| {
            let array = StreamArray::new(file_count, &temp, &pool)?;
            let presorter = if ordered {
                // One block stays unclaimed for the open write stream's page.
                Some(Presorter::new(cmp.clone(), &pool, total - 1)?)
            } else {
                None
            };
            Ok((array, presorter))
        })();
        let (array, presorter) = match built {
            Ok(parts) => parts,
            Err(e) => {
                // Partially built parts already dropped; the whole claim is
                // back in `reserved`.
                pool.unreserve(total);
                return Err(e);
            }
        };
        log::debug!(
            "sort created: {} blocks reserved, {} distribution files",
            total,
            file_count
        );
        Ok(Self {
            schema,
            cmp,
            pool,
            reservation: total,
            file_count,
            merge_step_bytes: config.merge_step_bytes,
            merge_step_rows: config.merge_step_rows,
            presorter,
            array: Some(array),
            merge: None,
            mem: None,
            result_idx: None,
            state: init_state,
            error: None,
            encode_buf: Vec::new(),
        })
    }

    pub fn state(&self) -> SorterState {
        self.state
    }

    pub fn last_error(&self) -> Option<&SortError> {
        self.error.as_ref()
    }

    /// Feeds one row into the sort. Valid in the INIT/ADD states.
    pub fn add_tuple(&mut self, row: &Row) -> SortResult<()> {
        self.check_error()?;
        let r = self.add_tuple_inner(row);
        self.latch(r)
    }

    fn add_tuple_inner(&mut self, row: &Row) -> SortResult<()> {
        match self.state {
            SorterState::Init | SorterState::Add => {
                self.state = SorterState::Add;
                if let Some(mem) = &mut self.mem {
                    row.encode_into(&mut self.encode_buf);
                    mem.rows.push(self.encode_buf.clone());
                    return Ok(());
                }
                let array = self.array.as_mut().expect("external sort has streams");
                let pre = self.presorter.as_mut().expect("ordered sort has presorter");
                pre.add_row(row, array)
            }
            SorterState::InitNoOrder | SorterState::AddNoOrder => {
                self.state = SorterState::AddNoOrder;
                row.encode_into(&mut self.encode_buf);
                if let Some(mem) = &mut self.mem {
                    mem.rows.push(self.encode_buf.clone());
                    return Ok(());
                }
                let array = self.array.as_mut().expect("external sort has streams");
                array.stream_mut(0).append_record(&self.encode_buf)
            }
            _ => Err(SortError::InvalidState("add_tuple requires INIT or ADD")),
        }
    }

    /// Advances the sort towards the cursor phase; the caller invokes this
    /// repeatedly until it returns `true`. Each call does at most one merge
    /// step's worth of work.
    pub fn run_merge_step(&mut self) -> SortResult<bool> {
        self.check_error()?;
        let r = self.run_merge_step_inner();
        self.latch(r)
    }

    fn run_merge_step_inner(&mut self) -> SortResult<bool> {
        match self.state {
            SorterState::Init | SorterState::Add => {
                if self.mem.is_some() {
                    self.sort_in_memory();
                    return Ok(true);
                }
                self.finish_distribution()?;
                if self.state == SorterState::Cursor {
                    return Ok(true);
                }
                self.step_merge()
            }
            SorterState::InitNoOrder | SorterState::AddNoOrder => {
                if self.mem.is_some() {
                    self.mem.as_mut().expect("checked").pos = 0;
                    self.state = SorterState::Cursor;
                    return Ok(true);
                }
                let array = self.array.as_mut().expect("external sort has streams");
                let stream = array.stream_mut(0);
                if !stream.is_empty() {
                    stream.set_eor_at_end()?;
                }
                self.enter_cursor(0)?;
                Ok(true)
            }
            SorterState::Merge => self.step_merge(),
            SorterState::Cursor => Ok(true),
            SorterState::Error => unreachable!("latched errors return earlier"),
        }
    }

    fn sort_in_memory(&mut self) {
        let mem = self.mem.as_mut().expect("in-memory mode");
        let cmp = &self.cmp;
        quicksort(&mut mem.rows, &|a: &Vec<u8>, b: &Vec<u8>| {
            cmp.compare(a, b).unwrap_or(std::cmp::Ordering::Equal)
        });
        mem.pos = 0;
        self.state = SorterState::Cursor;
    }

    /// Ends the ADD phase: flushes the last presort batch, drops the presort
    /// buffers, shrinks the reservation to the merge working set and decides
    /// whether a merge is needed at all.
    fn finish_distribution(&mut self) -> SortResult<()> {
        {
            let array = self.array.as_mut().expect("external sort has streams");
            if let Some(pre) = &mut self.presorter {
                pre.flush(array)?;
            }
        }
        self.presorter = None;
        let array = self.array.as_mut().expect("external sort has streams");
        array.close_all()?;
        // Freed presort blocks are back in the reservation; keep only one
        // page per mergeable stream.
        let merge_target = self.file_count + 1;
        if self.reservation > merge_target {
            self.pool.unreserve(self.reservation - merge_target);
            self.reservation = merge_target;
        }
        let array = self.array.as_mut().expect("external sort has streams");
        match array.end_of_distribute()? {
            Distribution::Empty => {
                log::debug!("sort of zero rows, empty cursor");
                self.enter_cursor(0)
            }
            Distribution::Single(idx) => {
                log::debug!("single-run sort, merge phase skipped");
                self.enter_cursor(idx)
            }
            Distribution::Merge => {
                self.merge = Some(MergeEngine::new(
                    self.cmp.clone(),
                    self.array.as_ref().expect("just used"),
                    self.merge_step_bytes,
                    self.merge_step_rows,
                ));
                self.state = SorterState::Merge;
                Ok(())
            }
        }
    }

    fn step_merge(&mut self) -> SortResult<bool> {
        let engine = self.merge.as_mut().expect("MERGE state has engine");
        let array = self.array.as_mut().expect("external sort has streams");
        match engine.step(array)? {
            MergeStep::Continue => Ok(false),
            MergeStep::Success => {
                let idx = engine.result().expect("successful merge names result");
                self.merge = None;
                self.enter_cursor(idx)?;
                Ok(true)
            }
        }
    }

    fn enter_cursor(&mut self, idx: usize) -> SortResult<()> {
        let array = self.array.as_mut().expect("external sort has streams");
        array.close_all()?;
        {
            let s = array.stream_mut(idx);
            s.init_fetch()?;
            s.start_cursor()?;
        }
        self.result_idx = Some(idx);
        // Only the result stream's page remains in the budget.
        if self.reservation > 1 {
            self.pool.unreserve(self.reservation - 1);
            self.reservation = 1;
        }
        self.state = SorterState::Cursor;
        log::debug!("sort entering cursor phase on stream {}", idx);
        Ok(())
    }

    /// Fetches the next row of the sorted result, or `None` at the end.
    pub fn fetch_next(&mut self) -> SortResult<Option<Row>> {
        self.check_error()?;
        let r = self.fetch_next_inner();
        self.latch(r)
    }

    fn fetch_next_inner(&mut self) -> SortResult<Option<Row>> {
        if self.state != SorterState::Cursor {
            return Err(SortError::InvalidState("fetch_next requires CURSOR"));
        }
        if let Some(mem) = &mut self.mem {
            if mem.pos >= mem.rows.len() {
                return Ok(None);
            }
            let row = Row::decode(&mem.rows[mem.pos], &self.schema)?;
            mem.pos += 1;
            return Ok(Some(row));
        }
        let idx = self.result_idx.expect("CURSOR state has result stream");
        let array = self.array.as_mut().expect("external sort has streams");
        let schema = &self.schema;
        let s = array.stream_mut(idx);
        loop {
            match s.get_next()? {
                StreamStatus::Run => return Ok(Some(Row::decode(s.current(), schema)?)),
                StreamStatus::Eor | StreamStatus::Hold => s.skip_eor()?,
                StreamStatus::Eos | StreamStatus::Bos => return Ok(None),
                StreamStatus::Error => {
                    return Err(SortError::InvalidState("result stream in error"))
                }
            }
        }
    }

    /// Fetches the row before the cursor, or `None` at the beginning.
    pub fn fetch_prev(&mut self) -> SortResult<Option<Row>> {
        self.check_error()?;
        let r = self.fetch_prev_inner();
        self.latch(r)
    }

    fn fetch_prev_inner(&mut self) -> SortResult<Option<Row>> {
        if self.state != SorterState::Cursor {
            return Err(SortError::InvalidState("fetch_prev requires CURSOR"));
        }
        if let Some(mem) = &mut self.mem {
            if mem.pos == 0 {
                return Ok(None);
            }
            mem.pos -= 1;
            return Ok(Some(Row::decode(&mem.rows[mem.pos], &self.schema)?));
        }
        let idx = self.result_idx.expect("CURSOR state has result stream");
        let array = self.array.as_mut().expect("external sort has streams");
        let schema = &self.schema;
        let s = array.stream_mut(idx);
        loop {
            match s.get_prev()? {
                StreamStatus::Run => return Ok(Some(Row::decode(s.current(), schema)?)),
                StreamStatus::Eor | StreamStatus::Hold => s.skip_eor()?,
                StreamStatus::Eos | StreamStatus::Bos => return Ok(None),
                StreamStatus::Error => {
                    return Err(SortError::InvalidState("result stream in error"))
                }
            }
        }
    }

    pub fn cursor_to_begin(&mut self) -> SortResult<()> {
        self.check_error()?;
        if self.state != SorterState::Cursor {
            let e = SortError::InvalidState("cursor_to_begin requires CURSOR");
            return self.latch(Err(e));
        }
        if let Some(mem) = &mut self.mem {
            mem.pos = 0;
            return Ok(());
        }
        let idx = self.result_idx.expect("CURSOR state has result stream");
        self.array
            .as_mut()
            .expect("external sort has streams")
            .stream_mut(idx)
            .cursor_to_begin();
        Ok(())
    }

    pub fn cursor_to_end(&mut self) -> SortResult<()> {
        self.check_error()?;
        if self.state != SorterState::Cursor {
            let e = SortError::InvalidState("cursor_to_end requires CURSOR");
            return self.latch(Err(e));
        }
        if let Some(mem) = &mut self.mem {
            mem.pos = mem.rows.len();
            return Ok(());
        }
        let idx = self.result_idx.expect("CURSOR state has result stream");
        self.array
            .as_mut()
            .expect("external sort has streams")
            .stream_mut(idx)
            .cursor_to_end();
        Ok(())
    }

    fn check_error(&self) -> SortResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn latch<T>(&mut self, r: SortResult<T>) -> SortResult<T> {
        if let Err(e) = &r {
            if self.state != SorterState::Error {
                log::warn!("sort failed: {}", e);
                self.state = SorterState::Error;
                self.error = Some(e.clone());
            }
        }
        r
    }
}

impl Drop for Sorter {
    fn drop(&mut self) {
        // Components first: their freed blocks flow back into the
        // reservation, which is then released in one piece.
        self.merge = None;
        self.presorter = None;
        self.array = None;
        if self.reservation > 0 {
            self.pool.unreserve(self.reservation);
            self.reservation = 0;
        }
    }
}
