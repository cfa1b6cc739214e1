//! MPI-IO backend.
//!
//! Every task opens the test file on `MPI_COMM_SELF` and issues independent
//! `MPI_File_write_at`/`MPI_File_read_at` calls, so the benchmark's own
//! task groups drive the file the same way as with the POSIX backend.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};

use iore_core::backend::Backend;
use iore_core::backend_options::BackendOptions;
use iore_core::comm::Collective;
use iore_core::error::{IoreError, Result};
use iore_core::handle::{FileHandle, OpenFlags};
use iore_core::test_spec::TestSpec;
use iore_core::workload::FileShareMode;
use mpi::ffi;

/// Open MPI file; closed on drop unless `close` already released it.
struct MpiFile {
    fh: ffi::MPI_File,
}

// SAFETY: the handle is only used by the task that opened it, one call at a time.
unsafe impl Send for MpiFile {}
unsafe impl Sync for MpiFile {}

impl MpiFile {
    fn null() -> Self {
        Self {
            fh: unsafe { ffi::RSMPI_FILE_NULL },
        }
    }

    fn is_open(&self) -> bool {
        self.fh != unsafe { ffi::RSMPI_FILE_NULL }
    }

    /// Take the raw handle, leaving `MPI_FILE_NULL` behind.
    fn take(&mut self) -> ffi::MPI_File {
        std::mem::replace(&mut self.fh, unsafe { ffi::RSMPI_FILE_NULL })
    }
}

impl Drop for MpiFile {
    fn drop(&mut self) {
        if self.is_open() {
            let mut fh = self.take();
            unsafe { ffi::MPI_File_close(&mut fh) };
        }
    }
}

/// Map open flags onto an MPI access mode.
///
/// Truncation has no access-mode bit; it is applied with
/// `MPI_File_set_size` after the open.
pub fn to_amode(flags: OpenFlags) -> c_int {
    let mut amode = if flags.contains(OpenFlags::RDWR) {
        ffi::MPI_MODE_RDWR as c_int
    } else if flags.contains(OpenFlags::WRONLY) {
        ffi::MPI_MODE_WRONLY as c_int
    } else {
        ffi::MPI_MODE_RDONLY as c_int
    };
    if flags.contains(OpenFlags::CREAT) {
        amode |= ffi::MPI_MODE_CREATE as c_int;
    }
    amode
}

fn error_string(code: c_int) -> String {
    let mut buf = vec![0 as c_char; ffi::MPI_MAX_ERROR_STRING as usize + 1];
    let mut len: c_int = 0;
    let rc = unsafe { ffi::MPI_Error_string(code, buf.as_mut_ptr(), &mut len) };
    if rc != ffi::MPI_SUCCESS as c_int {
        return format!("error code {code}");
    }
    let len = usize::try_from(len).unwrap_or(0).min(buf.len());
    let bytes: Vec<u8> = buf[..len].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn check(rc: c_int, op: &'static str) -> Result<()> {
    if rc == ffi::MPI_SUCCESS as c_int {
        return Ok(());
    }
    Err(IoreError::Mpi {
        op,
        reason: error_string(rc),
    })
}

fn error_class(code: c_int) -> c_int {
    let mut class: c_int = 0;
    let rc = unsafe { ffi::MPI_Error_class(code, &mut class) };
    if rc == ffi::MPI_SUCCESS as c_int { class } else { code }
}

/// Bytes moved by a completed transfer.
fn transferred(status: &ffi::MPI_Status) -> Result<usize> {
    let mut count: c_int = 0;
    check(
        unsafe { ffi::MPI_Get_count(status, ffi::RSMPI_UINT8_T, &mut count) },
        "get_count",
    )?;
    usize::try_from(count).map_err(|_| IoreError::Mpi {
        op: "get_count",
        reason: format!("undefined element count {count}"),
    })
}

fn request_args(len: usize, offset: u64) -> Result<(c_int, ffi::MPI_Offset)> {
    let count = c_int::try_from(len).map_err(|_| IoreError::InvalidArgument)?;
    let offset = ffi::MPI_Offset::try_from(offset).map_err(|_| IoreError::InvalidArgument)?;
    Ok((count, offset))
}

/// Backend over MPI-IO file handles.
///
/// Options (`--mpiio.key=value` or the `afio.mpiio` object):
/// - `seek_rw_single_op` (default true): `MPI_File_write_at`/`read_at`;
///   when false, `MPI_File_seek` followed by `MPI_File_write`/`read`.
/// - `collective_io`: rejected, files are opened per task.
pub struct MpiioBackend {
    pub seek_rw_single_op: bool,
}

impl Default for MpiioBackend {
    fn default() -> Self {
        Self {
            seek_rw_single_op: true,
        }
    }
}

impl MpiioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_file(&self, path: &str, flags: OpenFlags) -> Result<FileHandle> {
        let cpath = CString::new(path).map_err(|_| IoreError::InvalidArgument)?;
        let mut file = MpiFile::null();
        let rc = unsafe {
            ffi::MPI_File_open(
                ffi::RSMPI_COMM_SELF,
                cpath.as_ptr() as *mut c_char,
                to_amode(flags),
                ffi::RSMPI_INFO_NULL,
                &mut file.fh,
            )
        };
        if let Err(e) = check(rc, "file open") {
            log::error!("open '{path}' failed: {e}");
            return Err(e);
        }
        if flags.contains(OpenFlags::TRUNC) {
            check(unsafe { ffi::MPI_File_set_size(file.fh, 0) }, "file set_size")?;
        }
        log::trace!("open '{path}' amode {:#x}", to_amode(flags));

        Ok(FileHandle::new(path, file))
    }

    fn fh(handle: &FileHandle) -> Result<ffi::MPI_File> {
        handle
            .downcast_ref::<MpiFile>()
            .filter(|f| f.is_open())
            .map(|f| f.fh)
            .ok_or(IoreError::InvalidArgument)
    }
}

impl Backend for MpiioBackend {
    fn name(&self) -> &str {
        "mpiio"
    }

    fn configure(&mut self, opts: &BackendOptions) -> Result<()> {
        for (key, value) in opts.for_prefix("mpiio") {
            match key {
                "seek_rw_single_op" => self.seek_rw_single_op = value.as_bool(),
                "collective_io" if value.as_bool() => {
                    return Err(IoreError::config(
                        "mpiio.collective_io",
                        "collective transfers are not supported",
                    ));
                }
                "collective_io" => {}
                _ => log::warn!("mpiio: ignoring unknown option '{key}'"),
            }
        }
        log::debug!("mpiio: seek_rw_single_op={}", self.seek_rw_single_op);
        Ok(())
    }

    fn create(&self, path: &str, test: &TestSpec, comm: &dyn Collective) -> Result<FileHandle> {
        match test.file_mode {
            FileShareMode::PerTask => self.open_file(path, OpenFlags::for_create()),
            FileShareMode::Shared => {
                let created = if comm.is_master() {
                    Some(self.open_file(path, OpenFlags::for_create()))
                } else {
                    None
                };
                comm.barrier();
                match created {
                    Some(handle) => handle,
                    None => self.open_file(path, OpenFlags::for_update()),
                }
            }
        }
    }

    fn open(&self, path: &str, _test: &TestSpec) -> Result<FileHandle> {
        self.open_file(path, OpenFlags::for_read())
    }

    fn write_at(&self, handle: &mut FileHandle, buf: &[u8], offset: u64) -> Result<usize> {
        let fh = Self::fh(handle)?;
        let (count, offset) = request_args(buf.len(), offset)?;
        let mut status: ffi::MPI_Status = unsafe { std::mem::zeroed() };
        let data = buf.as_ptr() as *mut c_void;
        let rc = if self.seek_rw_single_op {
            unsafe {
                ffi::MPI_File_write_at(fh, offset, data, count, ffi::RSMPI_UINT8_T, &mut status)
            }
        } else {
            check(
                unsafe { ffi::MPI_File_seek(fh, offset, ffi::MPI_SEEK_SET as c_int) },
                "file seek",
            )?;
            unsafe { ffi::MPI_File_write(fh, data, count, ffi::RSMPI_UINT8_T, &mut status) }
        };
        check(rc, "file write")?;
        transferred(&status)
    }

    fn read_at(&self, handle: &mut FileHandle, buf: &mut [u8], offset: u64) -> Result<usize> {
        let fh = Self::fh(handle)?;
        let (count, offset) = request_args(buf.len(), offset)?;
        let mut status: ffi::MPI_Status = unsafe { std::mem::zeroed() };
        let data = buf.as_mut_ptr() as *mut c_void;
        let rc = if self.seek_rw_single_op {
            unsafe {
                ffi::MPI_File_read_at(fh, offset, data, count, ffi::RSMPI_UINT8_T, &mut status)
            }
        } else {
            check(
                unsafe { ffi::MPI_File_seek(fh, offset, ffi::MPI_SEEK_SET as c_int) },
                "file seek",
            )?;
            unsafe { ffi::MPI_File_read(fh, data, count, ffi::RSMPI_UINT8_T, &mut status) }
        };
        check(rc, "file read")?;
        transferred(&status)
    }

    fn flush(&self, handle: &mut FileHandle) -> Result<()> {
        let fh = Self::fh(handle)?;
        check(unsafe { ffi::MPI_File_sync(fh) }, "file sync")
    }

    fn close(&self, handle: FileHandle) -> Result<()> {
        let mut file = handle
            .into_inner::<MpiFile>()
            .ok_or(IoreError::InvalidArgument)?;
        let mut fh = file.take();
        check(unsafe { ffi::MPI_File_close(&mut fh) }, "file close")
    }

    fn remove(&self, path: &str) -> Result<()> {
        let cpath = CString::new(path).map_err(|_| IoreError::InvalidArgument)?;
        let rc = unsafe { ffi::MPI_File_delete(cpath.as_ptr() as *mut c_char, ffi::RSMPI_INFO_NULL) };
        if rc != ffi::MPI_SUCCESS as c_int && error_class(rc) == ffi::MPI_ERR_NO_SUCH_FILE as c_int {
            log::warn!("remove '{path}': no such file");
            return Ok(());
        }
        check(rc, "file delete")
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        match std::fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        std::fs::remove_dir(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iore_core::backend_options::OptionValue;

    #[test]
    fn test_amode_mapping() {
        let create = to_amode(OpenFlags::for_create());
        assert_ne!(create & ffi::MPI_MODE_CREATE as c_int, 0);
        assert_ne!(create & ffi::MPI_MODE_RDWR as c_int, 0);

        let update = to_amode(OpenFlags::for_update());
        assert_eq!(update & ffi::MPI_MODE_CREATE as c_int, 0);
        assert_ne!(update & ffi::MPI_MODE_RDWR as c_int, 0);

        assert_eq!(to_amode(OpenFlags::for_read()), ffi::MPI_MODE_RDONLY as c_int);
        assert_eq!(
            to_amode(OpenFlags::WRONLY | OpenFlags::DIRECT),
            ffi::MPI_MODE_WRONLY as c_int
        );
    }

    #[test]
    fn test_configure() {
        let mut backend = MpiioBackend::new();
        assert_eq!(backend.name(), "mpiio");
        assert_eq!(backend.buffer_alignment(), None);

        let mut opts = BackendOptions::new();
        opts.insert("mpiio.seek_rw_single_op".into(), OptionValue::Str("no".into()));
        opts.insert("mpiio.collective_io".into(), OptionValue::Str("false".into()));
        opts.insert("posix.direct_io".into(), OptionValue::Flag);
        backend.configure(&opts).unwrap();
        assert!(!backend.seek_rw_single_op);

        opts.insert("mpiio.collective_io".into(), OptionValue::Flag);
        assert!(backend.configure(&opts).unwrap_err().is_config());
    }

    #[test]
    fn test_request_args_bounds() {
        assert_eq!(request_args(4096, 8192).unwrap(), (4096, 8192));
        assert!(request_args(c_int::MAX as usize + 1, 0).is_err());
        assert!(request_args(1, u64::MAX).is_err());
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let backend = MpiioBackend::new();
        let mut h = FileHandle::new("/tmp/not-mpi", 7u32);
        assert!(matches!(
            backend.write_at(&mut h, b"x", 0),
            Err(IoreError::InvalidArgument)
        ));
        assert!(matches!(backend.flush(&mut h), Err(IoreError::InvalidArgument)));
    }

    #[test]
    fn test_mkdir_rmdir() {
        let dir = tempfile::tempdir().unwrap();
        let task_dir = dir.path().join("task.0").to_string_lossy().into_owned();
        let backend = MpiioBackend::new();

        backend.mkdir(&task_dir).unwrap();
        backend.mkdir(&task_dir).unwrap();
        backend.rmdir(&task_dir).unwrap();
        assert!(backend.rmdir(&task_dir).is_err());
    }
}
