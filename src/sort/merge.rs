//! Polyphase merge engine.
//!
//! One engine instance drives the whole merge: repeated passes over the
//! run-bearing streams, rotating roles after each pass, until one stream
//! holds the total order. The instantaneous working set is one candidate
//! record per input stream, kept ordered by binary-search insertion: the
//! stream count is small, so an ordered vector beats a heap on simplicity
//! with the same asymptotics at this size.

use std::cmp::Ordering;

use crate::error::{SortError, SortResult};
use crate::stream::{StreamArray, StreamStatus};
use crate::tuple::RecordComparator;

/// Outcome of one budgeted `step()` call. Failures surface as `Err`, so a
/// step either made progress or finished the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStep {
    Continue,
    Success,
}

#[derive(Debug)]
struct Candidate {
    stream: usize,
    record: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeState {
    StartRun,
    Run,
    Done(usize),
}

#[derive(Debug)]
pub struct MergeEngine {
    cmp: RecordComparator,
    step_bytes: usize,
    step_rows: usize,
    /// Ordered descending by sort key; `pop()` yields the smallest.
    candidates: Vec<Candidate>,
    eos: Vec<bool>,
    state: MergeState,
    pass: usize,
}

impl MergeEngine {
    pub fn new(
        cmp: RecordComparator,
        array: &StreamArray,
        step_bytes: usize,
        step_rows: usize,
    ) -> Self {
        Self {
            cmp,
            step_bytes,
            step_rows,
            candidates: Vec::with_capacity(array.file_count()),
            eos: vec![false; array.file_count() + 1],
            state: MergeState::StartRun,
            pass: 1,
        }
    }

    /// Index of the stream holding the final total order, once `step()` has
    /// returned `Success`.
    pub fn result(&self) -> Option<usize> {
        match self.state {
            MergeState::Done(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn pass(&self) -> usize {
        self.pass
    }

    /// Merges records until the per-call byte/row budget is spent. The budget
    /// bounds the work of one invocation, never the number of passes; the
    /// caller keeps invoking until `Success`.
    pub fn step(&mut self, array: &mut StreamArray) -> SortResult<MergeStep> {
        let mut bytes = 0usize;
        let mut rows = 0usize;
        loop {
            match self.state {
                MergeState::Done(_) => return Ok(MergeStep::Success),
                MergeState::StartRun => {
                    if self.start_run(array)? {
                        self.state = MergeState::Run;
                    } else if let MergeState::Done(_) = self.state {
                        return Ok(MergeStep::Success);
                    }
                    // An all-dummy run loops back into StartRun.
                }
                MergeState::Run => {
                    let Some(cand) = self.candidates.pop() else {
                        self.finish_run(array)?;
                        continue;
                    };
                    let out = array.write_idx();
                    array.stream_mut(out).append_record(&cand.record)?;
                    bytes += cand.record.len();
                    rows += 1;
                    self.refill(array, cand.stream)?;
                    if bytes >= self.step_bytes || rows >= self.step_rows {
                        return Ok(MergeStep::Continue);
                    }
                }
            }
        }
    }

    /// Pulls the first record of the next run from every live input. Returns
    /// false when the run produced no candidates; in that case the state is
    /// either `Done` (all inputs exhausted) or still `StartRun` after
    /// recording an all-dummy run on the output.
    fn start_run(&mut self, array: &mut StreamArray) -> SortResult<bool> {
        let inputs = array.read_set().to_vec();
        for &i in &inputs {
            if self.eos[i] {
                continue;
            }
            let status = {
                let s = array.stream_mut(i);
                let status = s.get_next()?;
                if status == StreamStatus::Hold {
                    // One dummy run consumed; contributes nothing.
                    s.skip_eor()?;
                    if s.at_end() {
                        self.eos[i] = true;
                    }
                }
                status
            };
            match status {
                StreamStatus::Run => {
                    let record = array.stream(i).current().to_vec();
                    self.insert_candidate(i, record);
                }
                StreamStatus::Hold => {}
                StreamStatus::Eos => {
                    self.eos[i] = true;
                }
                _ => {
                    debug_assert!(false, "unexpected stream status at run start");
                    return Err(SortError::InvalidState("merge input out of phase"));
                }
            }
        }
        if !self.candidates.is_empty() {
            return Ok(true);
        }
        if inputs.iter().all(|&i| self.eos[i]) {
            self.state = MergeState::Done(array.write_idx());
            log::debug!("merge complete after {} pass(es)", self.pass);
        } else {
            // Every live input contributed a dummy: the merged run is itself
            // a dummy on the output.
            let out = array.write_idx();
            array.stream_mut(out).add_dummy_runs(1);
        }
        Ok(false)
    }

    /// Closes the merged run on the output and decides what follows: another
    /// run in this pass, a role rotation for the next pass, or completion.
    fn finish_run(&mut self, array: &mut StreamArray) -> SortResult<()> {
        let out = array.write_idx();
        array.stream_mut(out).set_eor_at_end()?;

        let inputs = array.read_set().to_vec();
        let exhausted: Vec<usize> = inputs.iter().copied().filter(|&i| self.eos[i]).collect();
        if exhausted.len() == inputs.len() {
            self.state = MergeState::Done(out);
            log::debug!("merge complete after {} pass(es)", self.pass);
            return Ok(());
        }
        if let Some(&rotate_out) = exhausted.first() {
            array.rotate(rotate_out)?;
            self.eos[rotate_out] = false;
            self.pass += 1;
            log::debug!("merge pass {} starting, output stream {}", self.pass, rotate_out);
        }
        self.state = MergeState::StartRun;
        Ok(())
    }

    fn refill(&mut self, array: &mut StreamArray, from: usize) -> SortResult<()> {
        let status = {
            let s = array.stream_mut(from);
            let status = s.get_next()?;
            if status == StreamStatus::Eor {
                // Run boundary: consume it, and detect exhaustion here so a
                // pass ends at the boundary instead of one run late.
                s.skip_eor()?;
                if s.at_end() {
                    self.eos[from] = true;
                }
            }
            status
        };
        match status {
            StreamStatus::Run => {
                let record = array.stream(from).current().to_vec();
                self.insert_candidate(from, record);
                Ok(())
            }
            StreamStatus::Eor => Ok(()),
            StreamStatus::Eos => {
                self.eos[from] = true;
                Ok(())
            }
            _ => {
                debug_assert!(false, "unexpected stream status mid-run");
                Err(SortError::InvalidState("merge refill out of phase"))
            }
        }
    }

    fn insert_candidate(&mut self, stream: usize, record: Vec<u8>) {
        let cmp = &self.cmp;
        // Descending order, so the smallest candidate is popped from the end.
        let pos = self
            .candidates
            .binary_search_by(|c| {
                cmp.compare(&c.record, &record)
                    .unwrap_or(Ordering::Equal)
                    .reverse()
            })
            .unwrap_or_else(|p| p);
        self.candidates.insert(pos, Candidate { stream, record });
    }
}
