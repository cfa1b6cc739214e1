use std::cell::Cell;
use std::fmt;
use std::time::Instant;

use crate::comm::{Collective, MASTER_TASK};
use crate::error::{IoreError, Result};
use crate::test_spec::{Phase, SequenceId};

pub const NUM_ACTIONS: usize = 4;

/// Timed step of a test phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateOpen,
    WriteRead,
    Close,
    Remove,
}

impl Action {
    pub const ALL: [Action; NUM_ACTIONS] = [
        Action::CreateOpen,
        Action::WriteRead,
        Action::Close,
        Action::Remove,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Action::CreateOpen => "create/open",
            Action::WriteRead => "write/read",
            Action::Close => "close",
            Action::Remove => "remove",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Action::CreateOpen => 0,
            Action::WriteRead => 1,
            Action::Close => 2,
            Action::Remove => 3,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

thread_local! {
    /// Per-thread monotonic epoch, lazily initialized on first call to `now()`.
    static EPOCH: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Current timestamp in seconds (monotonic, relative to first call on this thread).
pub fn now() -> f64 {
    EPOCH.with(|cell| {
        let epoch = match cell.get() {
            Some(e) => e,
            None => {
                let e = Instant::now();
                cell.set(Some(e));
                e
            }
        };
        epoch.elapsed().as_secs_f64()
    })
}

/// Start/stop times of every action of one test phase on one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestRecord {
    pub seq: SequenceId,
    pub phase: Phase,
    /// `[action][0]` is the start time, `[action][1]` the stop time.
    pub times: [[f64; 2]; NUM_ACTIONS],
    /// Bytes moved by the write/read action.
    pub data_size: u64,
}

impl TestRecord {
    pub fn new(seq: SequenceId, phase: Phase) -> Self {
        Self {
            seq,
            phase,
            times: [[0.0; 2]; NUM_ACTIONS],
            data_size: 0,
        }
    }

    pub fn start(&self, action: Action) -> f64 {
        self.times[action.index()][0]
    }

    pub fn stop(&self, action: Action) -> f64 {
        self.times[action.index()][1]
    }

    pub fn latency(&self, action: Action) -> f64 {
        self.stop(action) - self.start(action)
    }

    /// Bytes per second for the write/read action, 0 for the others.
    pub fn throughput(&self, action: Action) -> f64 {
        let latency = self.latency(action);
        if action != Action::WriteRead || latency <= 0.0 {
            return 0.0;
        }
        self.data_size as f64 / latency
    }

    /// From the create/open start to the remove stop, or the close stop if
    /// nothing was removed.
    pub fn total_time(&self) -> f64 {
        let end = if self.latency(Action::Remove) > 0.0 {
            self.stop(Action::Remove)
        } else {
            self.stop(Action::Close)
        };
        end - self.start(Action::CreateOpen)
    }

    pub fn starts(&self) -> [f64; NUM_ACTIONS] {
        self.times.map(|t| t[0])
    }

    pub fn stops(&self) -> [f64; NUM_ACTIONS] {
        self.times.map(|t| t[1])
    }

    /// Record built from per-action times reduced over all tasks.
    pub fn from_reduced(
        seq: SequenceId,
        phase: Phase,
        starts: [f64; NUM_ACTIONS],
        stops: [f64; NUM_ACTIONS],
        data_size: u64,
    ) -> Self {
        let mut record = Self::new(seq, phase);
        for i in 0..NUM_ACTIONS {
            record.times[i] = [starts[i], stops[i]];
        }
        record.data_size = data_size;
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Replication,
    Run,
    Repetition,
}

/// Collects per-task timings while the experiment walks replications, runs
/// and repetitions.
///
/// The nesting is tracked with an explicit frame stack; a test can only be
/// recorded inside a repetition.
#[derive(Debug, Default)]
pub struct Recorder {
    clock_offset: f64,
    frames: Vec<Frame>,
    seq: SequenceId,
    current: Option<TestRecord>,
    records: Vec<TestRecord>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Align this task's clock with the master task's.
    ///
    /// All tasks must call this together.
    pub fn sync_clock(&mut self, comm: &dyn Collective) {
        comm.barrier();
        let local = now();
        let reference = comm.broadcast_f64(local, MASTER_TASK);
        self.clock_offset = local - reference;
        log::debug!("task {}: clock offset {:.9}s", comm.task_id(), self.clock_offset);
    }

    /// Time on the synchronized clock.
    pub fn time(&self) -> f64 {
        now() - self.clock_offset
    }

    pub fn clock_offset(&self) -> f64 {
        self.clock_offset
    }

    pub fn push_replication(&mut self, id: u32) -> Result<()> {
        self.push(Frame::Replication, 0)?;
        self.seq.replication = id;
        Ok(())
    }

    pub fn push_run(&mut self, id: u32) -> Result<()> {
        self.push(Frame::Run, 1)?;
        self.seq.run = id;
        Ok(())
    }

    pub fn push_repetition(&mut self, id: u32) -> Result<()> {
        self.push(Frame::Repetition, 2)?;
        self.seq.repetition = id;
        Ok(())
    }

    fn push(&mut self, frame: Frame, depth: usize) -> Result<()> {
        if self.frames.len() != depth || self.current.is_some() {
            return Err(nesting(format!("cannot enter {frame:?} at depth {}", self.frames.len())));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Leave the innermost frame.
    pub fn pop(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Err(nesting("frame closed while a test is open".into()));
        }
        self.frames
            .pop()
            .map(|_| ())
            .ok_or_else(|| nesting("no frame to close".into()))
    }

    pub fn sequence(&self) -> SequenceId {
        self.seq
    }

    pub fn begin_test(&mut self, phase: Phase) -> Result<()> {
        if self.frames.last() != Some(&Frame::Repetition) || self.current.is_some() {
            return Err(nesting(format!("cannot begin a {phase} test here")));
        }
        self.current = Some(TestRecord::new(self.seq, phase));
        Ok(())
    }

    pub fn start(&mut self, action: Action) -> Result<()> {
        let t = self.time();
        let record = self.current_mut()?;
        record.times[action.index()][0] = t;
        Ok(())
    }

    /// Stop `action`; `data_size` is kept for the write/read action.
    pub fn stop(&mut self, action: Action, data_size: u64) -> Result<()> {
        let t = self.time();
        let record = self.current_mut()?;
        record.times[action.index()][1] = t;
        if action == Action::WriteRead {
            record.data_size = data_size;
        }
        Ok(())
    }

    /// Commit the open test and return it.
    pub fn end_test(&mut self) -> Result<TestRecord> {
        let record = self
            .current
            .take()
            .ok_or_else(|| nesting("no test is open".into()))?;
        self.records.push(record);
        Ok(record)
    }

    pub fn records(&self) -> &[TestRecord] {
        &self.records
    }

    fn current_mut(&mut self) -> Result<&mut TestRecord> {
        self.current
            .as_mut()
            .ok_or_else(|| nesting("no test is open".into()))
    }
}

fn nesting(msg: String) -> IoreError {
    IoreError::config("recorder", msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;

    #[test]
    fn test_now_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn test_records_nest() {
        let mut rec = Recorder::new();
        rec.sync_clock(&LocalComm::solo());
        assert_eq!(rec.clock_offset(), 0.0);

        rec.push_replication(1).unwrap();
        rec.push_run(2).unwrap();
        rec.push_repetition(3).unwrap();
        rec.begin_test(Phase::Write).unwrap();
        for action in Action::ALL {
            rec.start(action).unwrap();
            rec.stop(action, 4096).unwrap();
        }
        let record = rec.end_test().unwrap();
        rec.pop().unwrap();
        rec.pop().unwrap();
        rec.pop().unwrap();

        assert_eq!(record.seq, SequenceId { replication: 1, run: 2, repetition: 3 });
        assert_eq!(record.data_size, 4096);
        assert!(record.stop(Action::Remove) >= record.start(Action::CreateOpen));
        assert_eq!(rec.records().len(), 1);
    }

    #[test]
    fn test_misnested_frames_rejected() {
        let mut rec = Recorder::new();
        assert!(rec.push_run(0).is_err());
        assert!(rec.begin_test(Phase::Read).is_err());
        assert!(rec.start(Action::Close).is_err());
        assert!(rec.pop().is_err());

        rec.push_replication(0).unwrap();
        rec.push_run(0).unwrap();
        assert!(rec.begin_test(Phase::Write).is_err());
        rec.push_repetition(0).unwrap();
        rec.begin_test(Phase::Write).unwrap();
        assert!(rec.pop().is_err());
        assert!(rec.begin_test(Phase::Write).is_err());
        rec.end_test().unwrap();
        assert!(rec.end_test().is_err());
    }

    #[test]
    fn test_record_derived_values() {
        let seq = SequenceId::default();
        let starts = [1.0, 2.0, 4.0, 0.0];
        let stops = [2.0, 4.0, 5.0, 0.0];
        let record = TestRecord::from_reduced(seq, Phase::Write, starts, stops, 1024);

        assert_eq!(record.latency(Action::WriteRead), 2.0);
        assert_eq!(record.throughput(Action::WriteRead), 512.0);
        assert_eq!(record.throughput(Action::Close), 0.0);
        // nothing removed: total ends at the close stop
        assert_eq!(record.total_time(), 4.0);
        assert_eq!(record.starts(), starts);
        assert_eq!(record.stops(), stops);

        let mut removed = TestRecord::from_reduced(seq, Phase::Read, starts, [2.0, 4.0, 5.0, 7.0], 0);
        removed.times[Action::Remove.index()][0] = 6.0;
        assert_eq!(removed.total_time(), 6.0);
    }

    #[test]
    fn test_action_labels() {
        let labels: Vec<_> = Action::ALL.iter().map(|a| a.label()).collect();
        assert_eq!(labels, vec!["create/open", "write/read", "close", "remove"]);
    }
}
