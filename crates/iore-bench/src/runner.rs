use std::time::Duration;

use iore_core::aligned_buf::AlignedBuffer;
use iore_core::backend::{Backend, BackendRegistry};
use iore_core::backend_options::BackendOptions;
use iore_core::comm::Collective;
use iore_core::error::{IoreError, Result};
use iore_core::experiment::{ExperimentSpec, RunOrder, RunSpec};
use iore_core::handle::FileHandle;
use iore_core::partition::{
    DatasetPhase, OffsetPhase, prepare_dataset_phase, prepare_offset_phase, resolve_sizes,
};
use iore_core::prng::sync_seed;
use iore_core::recorder::{Action, Recorder, TestRecord};
use iore_core::shuffle::shuffle;
use iore_core::test_spec::{Phase, TestSpec};
use iore_core::workload::{FileShareMode, WorkloadKind};
use mpi::topology::Color;
use mpi::traits::*;

use crate::export::current_time_string;
use crate::mpi_comm::MpiComm;
use crate::report;

/// Records collected over a whole experiment.
#[derive(Debug, Default)]
pub struct Outcome {
    /// This task's own records.
    pub task_records: Vec<TestRecord>,
    /// Records reduced over each test group; only filled on the master task.
    pub test_records: Vec<TestRecord>,
}

/// Drives replications, runs and repetitions over the world communicator.
pub struct Runner<'a> {
    world: &'a MpiComm,
    registry: &'a BackendRegistry,
    cli_opts: &'a BackendOptions,
    verbose: u8,
    recorder: Recorder,
    test_records: Vec<TestRecord>,
}

impl<'a> Runner<'a> {
    pub fn new(
        world: &'a MpiComm,
        registry: &'a BackendRegistry,
        cli_opts: &'a BackendOptions,
        verbose: u8,
    ) -> Self {
        Self {
            world,
            registry,
            cli_opts,
            verbose,
            recorder: Recorder::new(),
            test_records: Vec::new(),
        }
    }

    fn master(&self) -> bool {
        self.world.is_master()
    }

    /// Execute every replication of `exp`. Every world task must call this.
    pub fn run_experiment(mut self, exp: &ExperimentSpec) -> Result<Outcome> {
        self.recorder.sync_clock(self.world);
        let start = self.recorder.time();
        if self.master() {
            println!("Starting experiment at {}.\n", current_time_string());
        }

        for replication in 1..=exp.num_replications {
            self.run_replication(exp, replication)?;
        }

        if self.master() && self.verbose > 0 {
            println!(
                "Experiment executed in {:.5} seconds.",
                self.recorder.time() - start
            );
        }

        Ok(Outcome {
            task_records: self.recorder.records().to_vec(),
            test_records: self.test_records,
        })
    }

    fn run_replication(&mut self, exp: &ExperimentSpec, replication: u32) -> Result<()> {
        self.recorder.push_replication(replication)?;
        let start = self.recorder.time();
        if self.master() {
            println!("> Experiment replication #{replication}:");
        }
        log::debug!(
            "replication {replication}: {} tests",
            exp.tests_per_replication()
        );

        let mut order: Vec<usize> = (0..exp.runs.len()).collect();
        if exp.run_order == RunOrder::Random {
            let seed = sync_seed(self.world);
            shuffle(&mut order, seed)?;
            log::debug!("replication {replication}: run order {order:?}");
        }

        for idx in order {
            self.run(&exp.runs[idx], idx as u32 + 1)?;
        }

        if self.master() && self.verbose > 0 {
            println!(
                "Replication executed in {:.5} seconds.",
                self.recorder.time() - start
            );
        }
        self.recorder.pop()
    }

    fn run(&mut self, run: &RunSpec, run_id: u32) -> Result<()> {
        self.recorder.push_run(run_id)?;
        let start = self.recorder.time();

        // Tasks beyond the test's task count sit this run out.
        let member = self.world.task_id() < run.test.num_tasks();
        let color = if member {
            Color::with_value(0)
        } else {
            Color::undefined()
        };
        let group = self.world.raw().split_by_color(color);

        if let Some(group) = group.filter(|_| member) {
            let group = MpiComm::new(group);
            self.run_repetitions(run, run_id, &group)?;
        }

        self.world.barrier();
        if self.master() && self.verbose > 0 {
            println!(
                "Run repetitions executed in {:.5} seconds.",
                self.recorder.time() - start
            );
        }
        self.recorder.pop()
    }

    fn run_repetitions(&mut self, run: &RunSpec, run_id: u32, group: &MpiComm) -> Result<()> {
        let backend = self.registry.instantiate(&run.test.backend, self.cli_opts)?;
        // Sampled sizes hold for every phase and repetition of the run.
        let test = resolve_sizes(&run.test, group)?;
        log::debug!(
            "run {run_id}: {} tasks, {} workload, backend {}",
            group.num_tasks(),
            run.test.workload.kind.label(),
            backend.name()
        );

        for repetition in 1..=run.num_repetitions {
            self.recorder.push_repetition(repetition)?;
            if group.is_master() {
                println!("{}", report::repetition_header(run_id, repetition));
            }

            let start = self.recorder.time();
            self.execute_test(&test, backend.as_ref(), group)?;
            let stop = self.recorder.time();

            if let Some(span) = report::reduce_span(start, stop, group.raw()) {
                if self.verbose > 0 {
                    println!("Repetition executed in {span:.5} seconds.");
                }
            }
            self.recorder.pop()?;
        }
        Ok(())
    }

    fn execute_test(&mut self, test: &TestSpec, backend: &dyn Backend, group: &MpiComm) -> Result<()> {
        let seq = self.recorder.sequence();
        for phase in test.phases() {
            let record = execute_phase(&mut self.recorder, test, backend, group, phase)?;
            if let Some(reduced) = report::reduce_record(&record, group.raw()) {
                println!("{}", report::summary_line(&reduced));
                self.test_records.push(reduced);
            }
        }
        finish_test(test, backend, group, seq)
    }
}

/// Partition of one task for one phase.
#[derive(Debug)]
enum PhaseLayout {
    Offset(OffsetPhase),
    Dataset(DatasetPhase),
}

impl PhaseLayout {
    fn prepare(test: &TestSpec, comm: &dyn Collective, phase: Phase) -> Result<Self> {
        match test.workload.kind {
            WorkloadKind::Offset(_) => prepare_offset_phase(test, comm, phase).map(Self::Offset),
            WorkloadKind::Dataset(_) => prepare_dataset_phase(test, comm, phase).map(Self::Dataset),
        }
    }

    /// One request for offsets, the whole block for datasets.
    fn buffer_len(&self) -> usize {
        match self {
            Self::Offset(p) => p.sizes.my_req_size as usize,
            Self::Dataset(p) => p.block.size as usize,
        }
    }

    fn data_size(&self) -> u64 {
        match self {
            Self::Offset(p) => p.sizes.my_data_size,
            Self::Dataset(p) => p.block.size,
        }
    }

    /// Fail unless every request starts and ends on an `align` boundary.
    fn check_alignment(&self, align: usize) -> Result<()> {
        let align = align as u64;
        let (lens, offsets) = match self {
            Self::Offset(p) => ([p.sizes.my_req_size, p.sizes.my_data_size], &p.offsets),
            Self::Dataset(p) => ([p.block.row_len(), p.block.size], &p.offsets),
        };
        let misaligned = lens.iter().chain(offsets.iter()).find(|&&v| v % align != 0);
        match misaligned {
            Some(v) => Err(IoreError::config(
                "direct_io",
                format!("{v} is not a multiple of the {align}-byte alignment"),
            )),
            None => Ok(()),
        }
    }

    fn transfer(
        &self,
        backend: &dyn Backend,
        handle: &mut FileHandle,
        buf: &mut [u8],
        phase: Phase,
        test: &TestSpec,
    ) -> Result<u64> {
        match (self, phase) {
            (Self::Offset(p), Phase::Write) => backend.write_offsets(handle, buf, p, test),
            (Self::Offset(p), Phase::Read) => backend.read_offsets(handle, buf, p, test),
            (Self::Dataset(p), Phase::Write) => backend.write_dataset(handle, buf, p, test),
            (Self::Dataset(p), Phase::Read) => backend.read_dataset(handle, buf, p, test),
        }
    }
}

/// Byte every task writes: `'a'` shifted by its task id.
pub fn fill_byte(task_id: u32) -> u8 {
    b'a' + (task_id % 26) as u8
}

/// Run one phase of a test on this task and return its local record.
///
/// Collective over `comm`: every task of the group must call it with the
/// same test and phase.
pub fn execute_phase(
    recorder: &mut Recorder,
    test: &TestSpec,
    backend: &dyn Backend,
    comm: &dyn Collective,
    phase: Phase,
) -> Result<TestRecord> {
    comm.barrier();
    recorder.begin_test(phase)?;
    let seq = recorder.sequence();

    let layout = PhaseLayout::prepare(test, comm, phase)?;
    let target = phase.effective_task_id(comm.task_id(), test.num_tasks(), test.read_reorder_offset);
    let file = test.test_file(seq, target);
    let align = match backend.buffer_alignment() {
        Some(align) => {
            layout.check_alignment(align)?;
            align
        }
        None => 1,
    };
    let mut buf = match phase {
        Phase::Write => AlignedBuffer::filled(layout.buffer_len(), align, fill_byte(comm.task_id()))?,
        Phase::Read => AlignedBuffer::new(layout.buffer_len(), align)?,
    };

    if phase == Phase::Write {
        if let Some(dir) = &file.task_dir {
            backend.mkdir(dir)?;
        }
    }

    recorder.start(Action::CreateOpen)?;
    let mut handle = match phase {
        Phase::Write => backend.create(&file.path, test, comm)?,
        Phase::Read => backend.open(&file.path, test)?,
    };
    recorder.stop(Action::CreateOpen, 0)?;

    if test.intra_test_barrier {
        comm.barrier();
    }

    recorder.start(Action::WriteRead)?;
    let nbytes = layout.transfer(backend, &mut handle, &mut buf, phase, test)?;
    recorder.stop(Action::WriteRead, nbytes)?;
    let expected = layout.data_size();
    if nbytes != expected {
        return Err(IoreError::ShortTransfer {
            expected,
            actual: nbytes,
        });
    }

    if test.intra_test_barrier {
        comm.barrier();
    }

    recorder.start(Action::Close)?;
    backend.close(handle)?;
    recorder.stop(Action::Close, 0)?;

    if test.removes_after(phase) {
        comm.barrier();
        recorder.start(Action::Remove)?;
        if test.file_mode == FileShareMode::PerTask || comm.is_master() {
            backend.remove(&file.path)?;
        }
        recorder.stop(Action::Remove, 0)?;
    }

    comm.barrier();
    recorder.end_test()
}

/// Remove the task directory and wait out the inter-test delay.
fn finish_test(
    test: &TestSpec,
    backend: &dyn Backend,
    comm: &dyn Collective,
    seq: iore_core::test_spec::SequenceId,
) -> Result<()> {
    if !test.file_keep {
        if let Some(dir) = test.test_file(seq, comm.task_id()).task_dir {
            // Reordered reads remove files inside other tasks' directories.
            comm.barrier();
            backend.rmdir(&dir)?;
        }
    }
    if test.inter_test_delay_secs > 0 {
        std::thread::sleep(Duration::from_secs(u64::from(test.inter_test_delay_secs)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iore_backend_posix::PosixBackend;
    use iore_core::aligned_buf::page_size;
    use iore_core::backend_options::{BackendOptions, OptionValue};
    use iore_core::comm::LocalComm;
    use iore_core::prng::PrngDistribution;
    use iore_core::workload::{
        CartesianDataset, DatasetShape, DatasetWorkload, OffsetWorkload, SizeSource, VarType,
        Workload,
    };

    fn offset_test(dir: &std::path::Path, mode: FileShareMode) -> TestSpec {
        let mut test = TestSpec {
            file_mode: mode,
            file_name: dir.join("data.iore").to_string_lossy().into_owned(),
            workload: Workload {
                num_tasks: 1,
                kind: WorkloadKind::Offset(OffsetWorkload {
                    data_sizes: SizeSource::List(vec![10_000]),
                    req_sizes: SizeSource::List(vec![4096]),
                    ..OffsetWorkload::default()
                }),
            },
            ..TestSpec::default()
        };
        test.validate(1).unwrap();
        test
    }

    fn in_repetition(recorder: &mut Recorder) {
        recorder.push_replication(1).unwrap();
        recorder.push_run(1).unwrap();
        recorder.push_repetition(1).unwrap();
    }

    #[test]
    fn test_fill_byte_wraps() {
        assert_eq!(fill_byte(0), b'a');
        assert_eq!(fill_byte(25), b'z');
        assert_eq!(fill_byte(27), b'b');
    }

    #[test]
    fn test_write_then_read_phase() {
        let dir = tempfile::tempdir().unwrap();
        let test = offset_test(dir.path(), FileShareMode::Shared);
        let backend = PosixBackend::new();
        let comm = LocalComm::solo();
        let mut recorder = Recorder::new();
        in_repetition(&mut recorder);

        let write = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Write).unwrap();
        assert_eq!(write.phase, Phase::Write);
        assert_eq!(write.data_size, 10_000);
        assert!(write.latency(Action::WriteRead) >= 0.0);
        // The file stays for the read phase.
        assert_eq!(write.latency(Action::Remove), 0.0);
        let path = dir.path().join("data.iore");
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 10_000);
        assert!(bytes.iter().all(|&b| b == b'a'));

        let read = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Read).unwrap();
        assert_eq!(read.data_size, 10_000);
        assert!(!path.exists());
        assert_eq!(recorder.records().len(), 2);
    }

    #[test]
    fn test_sampled_sizes_survive_from_write_to_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut test = offset_test(dir.path(), FileShareMode::Shared);
        if let WorkloadKind::Offset(oset) = &mut test.workload.kind {
            oset.data_sizes = SizeSource::Distribution(PrngDistribution::uniform(1024.0, 1_048_576.0));
            oset.req_sizes = SizeSource::Distribution(PrngDistribution::uniform(512.0, 65_536.0));
        }
        let backend = PosixBackend::new();
        let comm = LocalComm::solo();
        let test = resolve_sizes(&test, &comm).unwrap();
        let mut recorder = Recorder::new();
        in_repetition(&mut recorder);

        let write = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Write).unwrap();
        let read = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Read).unwrap();
        assert_eq!(write.data_size, read.data_size);
        assert!((1024..=1_048_576).contains(&read.data_size));
    }

    fn direct_io_backend() -> PosixBackend {
        let mut backend = PosixBackend::new();
        let mut opts = BackendOptions::new();
        opts.insert("posix.direct_io".into(), OptionValue::Flag);
        backend.configure(&opts).unwrap();
        backend
    }

    #[test]
    fn test_direct_io_rejects_unaligned_requests() {
        let dir = tempfile::tempdir().unwrap();
        // 10_000 data bytes end off a page boundary.
        let test = offset_test(dir.path(), FileShareMode::Shared);
        let backend = direct_io_backend();
        let comm = LocalComm::solo();
        let mut recorder = Recorder::new();
        in_repetition(&mut recorder);

        let err = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Write).unwrap_err();
        assert!(err.is_config());
        assert!(!dir.path().join("data.iore").exists());
    }

    #[test]
    fn test_alignment_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut test = offset_test(dir.path(), FileShareMode::Shared);
        let comm = LocalComm::solo();
        let layout = PhaseLayout::prepare(&test, &comm, Phase::Write).unwrap();
        assert!(layout.check_alignment(4096).is_err());
        assert!(layout.check_alignment(8).is_ok());

        if let WorkloadKind::Offset(oset) = &mut test.workload.kind {
            oset.data_sizes = SizeSource::List(vec![8192]);
        }
        let layout = PhaseLayout::prepare(&test, &comm, Phase::Write).unwrap();
        layout.check_alignment(4096).unwrap();
        let page = page_size();
        let buf = AlignedBuffer::new(layout.buffer_len(), page).unwrap();
        assert_eq!(buf.as_ptr() as usize % page, 0);
    }

    #[test]
    fn test_file_keep_and_per_task_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut test = offset_test(dir.path(), FileShareMode::PerTask);
        test.read = false;
        test.file_keep = true;
        let backend = PosixBackend::new();
        let comm = LocalComm::solo();
        let mut recorder = Recorder::new();
        in_repetition(&mut recorder);

        execute_phase(&mut recorder, &test, &backend, &comm, Phase::Write).unwrap();
        assert!(dir.path().join("data.iore.0").exists());
    }

    #[test]
    fn test_read_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let test = offset_test(dir.path(), FileShareMode::Shared);
        let backend = PosixBackend::new();
        let comm = LocalComm::solo();
        let mut recorder = Recorder::new();
        in_repetition(&mut recorder);

        assert!(execute_phase(&mut recorder, &test, &backend, &comm, Phase::Read).is_err());
    }

    #[test]
    fn test_dataset_phase_with_task_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut test = TestSpec {
            file_mode: FileShareMode::PerTask,
            file_dir_per_task: true,
            file_name: dir.path().join("grid").to_string_lossy().into_owned(),
            workload: Workload {
                num_tasks: 1,
                kind: WorkloadKind::Dataset(DatasetWorkload {
                    var_types: vec![VarType::Double],
                    shape: DatasetShape::Cartesian(CartesianDataset {
                        dim_sizes: vec![8, 8],
                        dim_divs: vec![1, 1],
                    }),
                }),
            },
            ..TestSpec::default()
        };
        test.validate(1).unwrap();
        let backend = PosixBackend::new();
        let comm = LocalComm::solo();
        let mut recorder = Recorder::new();
        in_repetition(&mut recorder);

        let write = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Write).unwrap();
        assert_eq!(write.data_size, 8 * 8 * 8);
        assert!(dir.path().join("task.0/grid.0").exists());

        let read = execute_phase(&mut recorder, &test, &backend, &comm, Phase::Read).unwrap();
        assert_eq!(read.data_size, 512);

        finish_test(&test, &backend, &comm, recorder.sequence()).unwrap();
        assert!(!dir.path().join("task.0").exists());
    }
}
