use std::fmt;
use std::path::Path;

use crate::backend::BackendSpec;
use crate::error::{IoreError, Result};
use crate::workload::{FileShareMode, Workload};

pub const DEFAULT_FILE_NAME: &str = "./testfile.iore";

/// Test phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Write,
    Read,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Write, Phase::Read];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Write => "write",
            Phase::Read => "read",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Phase::Write => 0,
            Phase::Read => 1,
        }
    }

    /// Task whose data this task touches in this phase.
    ///
    /// Reads are shifted by `read_reorder_offset` so a task reads what a
    /// different task wrote.
    pub fn effective_task_id(&self, task_id: u32, num_tasks: u32, read_reorder_offset: u32) -> u32 {
        match self {
            Phase::Write => task_id,
            Phase::Read => {
                let shifted = u64::from(task_id) + u64::from(read_reorder_offset);
                (shifted % u64::from(num_tasks.max(1))) as u32
            }
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "write" => Ok(Phase::Write),
            "read" => Ok(Phase::Read),
            _ => Err(IoreError::config("type", format!("invalid value '{s}'"))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Position of a test inside the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceId {
    pub replication: u32,
    pub run: u32,
    pub repetition: u32,
}

/// Resolved location of a test file for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    pub path: String,
    /// Per-task directory to create before the test and remove after it.
    pub task_dir: Option<String>,
}

/// Everything one test needs: phases, file policy, workload and backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpec {
    pub write: bool,
    pub read: bool,
    /// Flush once after all writes.
    pub write_flush: bool,
    /// Flush after every write request.
    pub write_flush_per_req: bool,
    pub read_reorder_offset: u32,
    pub intra_test_barrier: bool,
    pub inter_test_delay_secs: u32,
    pub file_mode: FileShareMode,
    pub file_name: String,
    pub file_name_append_sequence_num: bool,
    pub file_name_append_task_id: bool,
    pub file_dir_per_task: bool,
    pub file_keep: bool,
    pub workload: Workload,
    pub backend: BackendSpec,
}

impl Default for TestSpec {
    fn default() -> Self {
        Self {
            write: true,
            read: true,
            write_flush: false,
            write_flush_per_req: false,
            read_reorder_offset: 0,
            intra_test_barrier: false,
            inter_test_delay_secs: 0,
            file_mode: FileShareMode::Shared,
            file_name: DEFAULT_FILE_NAME.to_string(),
            file_name_append_sequence_num: false,
            file_name_append_task_id: false,
            file_dir_per_task: false,
            file_keep: false,
            workload: Workload::default(),
            backend: BackendSpec::default(),
        }
    }
}

impl TestSpec {
    pub fn validate(&mut self, available_tasks: u32) -> Result<()> {
        if !self.write && !self.read {
            return Err(IoreError::config("type", "must contain write, read or both"));
        }
        if self.read && !self.write {
            log::warn!("read-only tests need data to read, adding a write phase");
            self.write = true;
        }
        if self.file_name.trim().is_empty() {
            return Err(IoreError::config("file_name", "must not be empty"));
        }
        if self.file_dir_per_task && self.file_mode == FileShareMode::Shared {
            log::warn!("file_dir_per_task has no effect in Nx1 mode");
        }
        self.workload.validate(available_tasks)
    }

    pub fn num_tasks(&self) -> u32 {
        self.workload.num_tasks
    }

    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        Phase::ALL.into_iter().filter(|p| match p {
            Phase::Write => self.write,
            Phase::Read => self.read,
        })
    }

    /// Whether `phase` should remove the file once it is closed.
    pub fn removes_after(&self, phase: Phase) -> bool {
        if self.file_keep {
            return false;
        }
        match phase {
            Phase::Write => !self.read,
            Phase::Read => true,
        }
    }

    fn uses_task_dir(&self) -> bool {
        self.file_dir_per_task && self.file_mode == FileShareMode::PerTask
    }

    /// Name of the file `task_id` accesses during test `seq`.
    pub fn test_file(&self, seq: SequenceId, task_id: u32) -> TestFile {
        let full = Path::new(&self.file_name);
        let mut base = full
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone());
        let mut dir = match full.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };

        if self.file_name_append_sequence_num {
            base = format!("{base}.{}.{}.{}", seq.replication, seq.run, seq.repetition);
        }
        if self.file_name_append_task_id || self.file_mode == FileShareMode::PerTask {
            base = format!("{base}.{task_id}");
        }

        let mut task_dir = None;
        if self.uses_task_dir() {
            dir = format!("{dir}/task.{task_id}");
            task_dir = Some(dir.clone());
        }

        TestFile {
            path: format!("{dir}/{base}"),
            task_dir,
        }
    }
}
