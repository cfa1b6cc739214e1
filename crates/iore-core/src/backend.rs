use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::backend_options::BackendOptions;
use crate::comm::Collective;
use crate::error::{IoreError, Result};
use crate::handle::FileHandle;
use crate::partition::{DatasetPhase, OffsetPhase};
use crate::test_spec::TestSpec;

/// Storage backends known to the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BackendKind {
    #[default]
    Posix,
    Cstream,
    Mpiio,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Posix => "posix",
            BackendKind::Cstream => "cstream",
            BackendKind::Mpiio => "mpiio",
        }
    }
}

impl FromStr for BackendKind {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "posix" => Ok(BackendKind::Posix),
            "cstream" => Ok(BackendKind::Cstream),
            "mpiio" => Ok(BackendKind::Mpiio),
            _ => Err(IoreError::config("afio", format!("unsupported backend '{s}'"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Backend a test runs on, with its `afio` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendSpec {
    pub kind: BackendKind,
    pub params: BTreeMap<String, String>,
}

/// Uniform operation set of a storage backend.
///
/// Implementors provide the primitives; the offset and dataset transfers
/// are built on top of them and apply the request clamping and flush
/// policy of the test.
pub trait Backend {
    fn name(&self) -> &str;

    /// Apply `prefix.key` options addressed to this backend.
    fn configure(&mut self, opts: &BackendOptions) -> Result<()> {
        let _ = opts;
        Ok(())
    }

    /// Alignment that transfer buffers, request sizes and offsets must
    /// honor, or `None` when any layout works.
    fn buffer_alignment(&self) -> Option<usize> {
        None
    }

    /// Create the test file for writing.
    ///
    /// In Nx1 mode only the master task creates and truncates the file; the
    /// other tasks open it for update after a barrier.
    fn create(&self, path: &str, test: &TestSpec, comm: &dyn Collective) -> Result<FileHandle>;

    /// Open an existing test file for reading.
    fn open(&self, path: &str, test: &TestSpec) -> Result<FileHandle>;

    /// Write once at `offset`, returning the bytes accepted.
    fn write_at(&self, handle: &mut FileHandle, buf: &[u8], offset: u64) -> Result<usize>;

    /// Read once at `offset`, returning the bytes read (0 at end of file).
    fn read_at(&self, handle: &mut FileHandle, buf: &mut [u8], offset: u64) -> Result<usize>;

    fn flush(&self, handle: &mut FileHandle) -> Result<()>;

    fn close(&self, handle: FileHandle) -> Result<()>;

    fn remove(&self, path: &str) -> Result<()>;

    /// Create a directory; an existing one is not an error.
    fn mkdir(&self, path: &str) -> Result<()> {
        let _ = path;
        Err(IoreError::NotSupported)
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let _ = path;
        Err(IoreError::NotSupported)
    }

    /// Write all of `buf` at `offset`, retrying partial writes.
    fn write_all_at(&self, handle: &mut FileHandle, buf: &[u8], offset: u64) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let n = self.write_at(handle, &buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(IoreError::ShortTransfer {
                    expected: buf.len() as u64,
                    actual: done as u64,
                });
            }
            done += n;
        }
        Ok(())
    }

    /// Fill `buf` from `offset`, retrying partial reads.
    fn read_exact_at(&self, handle: &mut FileHandle, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let n = self.read_at(handle, &mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(IoreError::ShortTransfer {
                    expected: buf.len() as u64,
                    actual: done as u64,
                });
            }
            done += n;
        }
        Ok(())
    }

    /// Issue every request of an offset phase from the same buffer.
    ///
    /// `buf` must hold at least one full request.
    fn write_offsets(
        &self,
        handle: &mut FileHandle,
        buf: &[u8],
        phase: &OffsetPhase,
        test: &TestSpec,
    ) -> Result<u64> {
        let mut requests = phase.requests();
        let mut nbytes = 0u64;
        for (offset, len) in requests.by_ref() {
            let chunk = request_slice(buf, len)?;
            self.write_all_at(handle, chunk, offset)?;
            nbytes += len;
            if test.write_flush_per_req {
                self.flush(handle)?;
            }
        }
        check_drained(phase.task_id, requests.remaining())?;
        if nbytes > 0 && test.write_flush {
            self.flush(handle)?;
        }
        Ok(nbytes)
    }

    fn read_offsets(
        &self,
        handle: &mut FileHandle,
        buf: &mut [u8],
        phase: &OffsetPhase,
        test: &TestSpec,
    ) -> Result<u64> {
        let _ = test;
        let mut requests = phase.requests();
        let mut nbytes = 0u64;
        for (offset, len) in requests.by_ref() {
            let chunk = request_slice_mut(buf, len)?;
            self.read_exact_at(handle, chunk, offset)?;
            nbytes += len;
        }
        check_drained(phase.task_id, requests.remaining())?;
        Ok(nbytes)
    }

    /// Write a dataset block row by row; `buf` holds the whole block.
    fn write_dataset(
        &self,
        handle: &mut FileHandle,
        buf: &[u8],
        phase: &DatasetPhase,
        test: &TestSpec,
    ) -> Result<u64> {
        let row_len = phase.block.row_len() as usize;
        check_dataset_buf(buf.len(), row_len, phase.offsets.len())?;
        let mut nbytes = 0u64;
        for (row, &offset) in buf.chunks(row_len.max(1)).zip(&phase.offsets) {
            self.write_all_at(handle, row, offset)?;
            nbytes += row_len as u64;
            if test.write_flush_per_req {
                self.flush(handle)?;
            }
        }
        if nbytes > 0 && test.write_flush {
            self.flush(handle)?;
        }
        Ok(nbytes)
    }

    fn read_dataset(
        &self,
        handle: &mut FileHandle,
        buf: &mut [u8],
        phase: &DatasetPhase,
        test: &TestSpec,
    ) -> Result<u64> {
        let _ = test;
        let row_len = phase.block.row_len() as usize;
        check_dataset_buf(buf.len(), row_len, phase.offsets.len())?;
        let mut nbytes = 0u64;
        for (row, &offset) in buf.chunks_mut(row_len.max(1)).zip(&phase.offsets) {
            self.read_exact_at(handle, row, offset)?;
            nbytes += row_len as u64;
        }
        Ok(nbytes)
    }
}

fn request_slice(buf: &[u8], len: u64) -> Result<&[u8]> {
    buf.get(..len as usize).ok_or(IoreError::InvalidArgument)
}

fn request_slice_mut(buf: &mut [u8], len: u64) -> Result<&mut [u8]> {
    buf.get_mut(..len as usize).ok_or(IoreError::InvalidArgument)
}

fn check_dataset_buf(buf_len: usize, row_len: usize, rows: usize) -> Result<()> {
    if buf_len < row_len * rows {
        return Err(IoreError::InvalidArgument);
    }
    Ok(())
}

fn check_drained(task_id: u32, remaining: u64) -> Result<()> {
    if remaining > 0 {
        return Err(IoreError::Partition(format!(
            "task {task_id}: offsets exhausted with {remaining} bytes left"
        )));
    }
    Ok(())
}

/// Constructor of a fresh, unconfigured backend.
pub type BackendFactory = fn() -> Box<dyn Backend>;

/// Backends available to the benchmark, keyed by kind.
///
/// Every test gets its own instance, configured from the command-line
/// options overlaid with the test's `afio` parameters.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<BackendKind, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: BackendKind, factory: BackendFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Build the backend of `spec` and apply its options.
    pub fn instantiate(&self, spec: &BackendSpec, cli: &BackendOptions) -> Result<Box<dyn Backend>> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| {
            IoreError::config("afio", format!("backend '{}' is not available", spec.kind))
        })?;
        let mut backend = factory();
        backend.configure(&cli.merged_with(spec.kind.label(), &spec.params))?;
        Ok(backend)
    }

    pub fn kinds(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.factories.keys().copied()
    }
}
