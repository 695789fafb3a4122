//! Polyphase run distribution over F+1 streams.
//!
//! During distribution, streams `1..=F` receive runs and stream `0` is held
//! back as the first merge output. Per-stream targets follow the polyphase
//! "perfect distribution" recurrence (Fibonacci-like level advance); each new
//! run goes to the stream farthest below its target, and at the end every
//! under-filled stream is padded with dummy runs so the merge always consumes
//! one run per input per merged run.

use crate::error::{SortError, SortResult};
use crate::mem::MemoryPool;
use crate::stream::Stream;
use crate::temp::TempFileManager;

/// Outcome of the distribution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// No runs at all: the result is empty.
    Empty,
    /// Exactly one run; the named stream already holds the total order.
    Single(usize),
    /// Multiple runs; a merge is required.
    Merge,
}

#[derive(Debug)]
pub struct StreamArray {
    streams: Vec<Stream>,
    max_runs: Vec<usize>,
    act_runs: Vec<usize>,
    total_runs: usize,
    target_total: usize,
    level: usize,
    write_idx: usize,
    read_set: Vec<usize>,
}

impl StreamArray {
    /// Creates F+1 empty streams, one temp file each.
    pub fn new(
        file_count: usize,
        manager: &TempFileManager,
        pool: &MemoryPool,
    ) -> SortResult<Self> {
        if file_count < 2 {
            return Err(SortError::Config(
                "polyphase merge needs at least 2 distribution files".into(),
            ));
        }
        let n = file_count + 1;
        let mut streams = Vec::with_capacity(n);
        for _ in 0..n {
            let mut s = Stream::new(manager.create_file(pool)?);
            // Hold no page buffers until a stream is actually used.
            s.close()?;
            streams.push(s);
        }
        let mut max_runs = vec![0usize; n];
        max_runs[1] = 1;
        Ok(Self {
            streams,
            max_runs,
            act_runs: vec![0; n],
            total_runs: 0,
            target_total: 1,
            level: 0,
            write_idx: 0,
            read_set: Vec::new(),
        })
    }

    pub fn file_count(&self) -> usize {
        self.streams.len() - 1
    }

    pub fn total_runs(&self) -> usize {
        self.total_runs
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn runs_target(&self, i: usize) -> usize {
        self.max_runs[i]
    }

    pub fn runs_actual(&self, i: usize) -> usize {
        self.act_runs[i]
    }

    pub fn write_idx(&self) -> usize {
        self.write_idx
    }

    pub fn read_set(&self) -> &[usize] {
        &self.read_set
    }

    pub fn stream(&self, i: usize) -> &Stream {
        &self.streams[i]
    }

    pub fn stream_mut(&mut self, i: usize) -> &mut Stream {
        &mut self.streams[i]
    }

    pub fn close_all(&mut self) -> SortResult<()> {
        for s in &mut self.streams {
            s.close()?;
        }
        Ok(())
    }

    /// Selects the stream that receives the next distribution run: closes all
    /// stream files to bound open-file memory, advances the perfect
    /// distribution when the aggregate target is exceeded, then reopens and
    /// returns the stream farthest below its target.
    pub fn next_stream(&mut self) -> SortResult<usize> {
        self.close_all()?;
        self.total_runs += 1;
        while self.total_runs > self.target_total {
            self.advance_level();
        }
        let mut best = 1;
        let mut best_deficit = 0usize;
        for i in 1..self.streams.len() {
            let deficit = self.max_runs[i] - self.act_runs[i];
            if deficit > best_deficit {
                best = i;
                best_deficit = deficit;
            }
        }
        debug_assert!(best_deficit > 0, "no stream below its run target");
        self.act_runs[best] += 1;
        self.streams[best].open()?;
        Ok(best)
    }

    /// Advances the perfect-distribution targets one level:
    /// `t'[i] = max + t[i+1]` over the descending target sequence, with the
    /// smallest new target equal to the old maximum.
    fn advance_level(&mut self) {
        let n = self.streams.len();
        let old: Vec<usize> = self.max_runs[1..].to_vec();
        let m = old[0];
        for i in 1..n {
            self.max_runs[i] = if i < n - 1 { m + old[i] } else { m };
        }
        self.level += 1;
        self.target_total = self.max_runs[1..].iter().sum();
        log::debug!(
            "distribution level {} targets {:?} (total {})",
            self.level,
            &self.max_runs[1..],
            self.target_total
        );
    }

    /// Ends distribution. With zero or one run the merge phase is skipped
    /// entirely; otherwise every stream is padded to its target with dummy
    /// runs, the read set is rewound, and stream 0 becomes the write target.
    pub fn end_of_distribute(&mut self) -> SortResult<Distribution> {
        if self.total_runs == 0 {
            return Ok(Distribution::Empty);
        }
        if self.total_runs == 1 {
            let idx = (1..self.streams.len())
                .find(|&i| self.act_runs[i] == 1)
                .expect("one run recorded");
            return Ok(Distribution::Single(idx));
        }
        for i in 1..self.streams.len() {
            let dummies = self.max_runs[i] - self.act_runs[i];
            if dummies > 0 {
                self.streams[i].add_dummy_runs(dummies);
                self.act_runs[i] = self.max_runs[i];
            }
        }
        self.write_idx = 0;
        self.read_set = (1..self.streams.len()).collect();
        for i in 1..self.streams.len() {
            self.streams[i].init_fetch()?;
        }
        log::debug!(
            "distribution done: {} runs over {} streams at level {}",
            self.total_runs,
            self.file_count(),
            self.level
        );
        Ok(Distribution::Merge)
    }

    /// Rotates stream roles after a merge pass: the exhausted input is
    /// truncated and becomes the next write target, and the previous output
    /// joins the read set.
    pub fn rotate(&mut self, exhausted: usize) -> SortResult<()> {
        debug_assert!(self.read_set.contains(&exhausted));
        self.streams[exhausted].rewrite()?;
        self.streams[self.write_idx].init_fetch()?;
        self.read_set.retain(|&i| i != exhausted);
        self.read_set.push(self.write_idx);
        self.write_idx = exhausted;
        Ok(())
    }
}
