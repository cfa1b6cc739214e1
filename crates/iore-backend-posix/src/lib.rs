use std::ffi::CString;
use std::os::raw::c_int;
use std::os::unix::io::RawFd;

use iore_core::aligned_buf::page_size;
use iore_core::backend::Backend;
use iore_core::backend_options::BackendOptions;
use iore_core::comm::Collective;
use iore_core::error::{IoreError, Result};
use iore_core::handle::{FileHandle, OpenFlags};
use iore_core::test_spec::TestSpec;
use iore_core::workload::FileShareMode;

/// Permission bits of created test files.
const FILE_MODE: libc::mode_t = 0o664;
const DIR_MODE: libc::mode_t = 0o755;

/// Internal wrapper holding a POSIX file descriptor.
struct PosixFd {
    fd: RawFd,
}

impl Drop for PosixFd {
    // Handles dropped without `close` (a failed transfer) still release the fd.
    fn drop(&mut self) {
        if self.fd >= 0 {
            log::trace!("closing dropped fd {}", self.fd);
            unsafe { libc::close(self.fd) };
        }
    }
}

/// Backend over raw file descriptors.
///
/// Options (`--posix.key=value` or the `afio.posix` object):
/// - `seek_rw_single_op` (default true): positioned `pwrite`/`pread`;
///   when false, `lseek` followed by `write`/`read`.
/// - `direct_io`: open test files with `O_DIRECT`.
pub struct PosixBackend {
    pub direct_io: bool,
    pub seek_rw_single_op: bool,
}

impl Default for PosixBackend {
    fn default() -> Self {
        Self {
            direct_io: false,
            seek_rw_single_op: true,
        }
    }
}

impl PosixBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert OpenFlags to libc O_* flags.
    fn to_libc_flags(&self, flags: OpenFlags) -> c_int {
        let mut oflags: c_int = 0;

        if flags.contains(OpenFlags::RDONLY)
            && !flags.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
        {
            oflags |= libc::O_RDONLY;
        }
        if flags.contains(OpenFlags::WRONLY) {
            oflags |= libc::O_WRONLY;
        }
        if flags.contains(OpenFlags::RDWR) {
            oflags |= libc::O_RDWR;
        }
        if flags.contains(OpenFlags::CREAT) {
            oflags |= libc::O_CREAT;
        }
        if flags.contains(OpenFlags::TRUNC) {
            oflags |= libc::O_TRUNC;
        }
        if flags.contains(OpenFlags::DIRECT) || self.direct_io {
            oflags |= libc::O_DIRECT;
        }

        oflags
    }

    fn path_to_cstring(path: &str) -> Result<CString> {
        CString::new(path).map_err(|_| IoreError::InvalidArgument)
    }

    fn errno() -> i32 {
        unsafe { *libc::__errno_location() }
    }

    fn open_fd(&self, path: &str, flags: OpenFlags) -> Result<FileHandle> {
        let cpath = Self::path_to_cstring(path)?;
        let oflags = self.to_libc_flags(flags);

        let fd = unsafe { libc::open(cpath.as_ptr(), oflags, FILE_MODE as libc::c_uint) };
        if fd < 0 {
            let errno = Self::errno();
            log::error!("open '{path}' failed: errno {errno}");
            return Err(IoreError::Io(errno));
        }
        log::trace!("open '{path}' -> fd {fd}");

        Ok(FileHandle::new(path, PosixFd { fd }))
    }

    fn fd(handle: &FileHandle) -> Result<RawFd> {
        handle
            .downcast_ref::<PosixFd>()
            .map(|p| p.fd)
            .ok_or(IoreError::InvalidArgument)
    }

    fn seek(fd: RawFd, offset: u64) -> Result<()> {
        let rc = unsafe { libc::lseek(fd, offset as libc::off_t, libc::SEEK_SET) };
        if rc < 0 {
            return Err(IoreError::Io(Self::errno()));
        }
        Ok(())
    }
}

impl Backend for PosixBackend {
    fn name(&self) -> &str {
        "posix"
    }

    fn configure(&mut self, opts: &BackendOptions) -> Result<()> {
        for (key, value) in opts.for_prefix("posix") {
            match key {
                "direct_io" => self.direct_io = value.as_bool(),
                "seek_rw_single_op" => self.seek_rw_single_op = value.as_bool(),
                _ => log::warn!("posix: ignoring unknown option '{key}'"),
            }
        }
        log::debug!(
            "posix: direct_io={} seek_rw_single_op={}",
            self.direct_io,
            self.seek_rw_single_op
        );
        Ok(())
    }

    fn buffer_alignment(&self) -> Option<usize> {
        self.direct_io.then(page_size)
    }

    fn create(&self, path: &str, test: &TestSpec, comm: &dyn Collective) -> Result<FileHandle> {
        match test.file_mode {
            FileShareMode::PerTask => self.open_fd(path, OpenFlags::for_create()),
            FileShareMode::Shared => {
                // The barrier is reached even when the master fails to create
                // the file, so the other tasks see the error on open.
                let created = if comm.is_master() {
                    Some(self.open_fd(path, OpenFlags::for_create()))
                } else {
                    None
                };
                comm.barrier();
                match created {
                    Some(handle) => handle,
                    None => self.open_fd(path, OpenFlags::for_update()),
                }
            }
        }
    }

    fn open(&self, path: &str, _test: &TestSpec) -> Result<FileHandle> {
        self.open_fd(path, OpenFlags::for_read())
    }

    fn write_at(&self, handle: &mut FileHandle, buf: &[u8], offset: u64) -> Result<usize> {
        let fd = Self::fd(handle)?;
        let rc = if self.seek_rw_single_op {
            unsafe {
                libc::pwrite(
                    fd,
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    offset as libc::off_t,
                )
            }
        } else {
            Self::seek(fd, offset)?;
            unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) }
        };
        if rc < 0 {
            return Err(IoreError::Io(Self::errno()));
        }
        Ok(rc as usize)
    }

    fn read_at(&self, handle: &mut FileHandle, buf: &mut [u8], offset: u64) -> Result<usize> {
        let fd = Self::fd(handle)?;
        let rc = if self.seek_rw_single_op {
            unsafe {
                libc::pread(
                    fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    offset as libc::off_t,
                )
            }
        } else {
            Self::seek(fd, offset)?;
            unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) }
        };
        if rc < 0 {
            return Err(IoreError::Io(Self::errno()));
        }
        Ok(rc as usize)
    }

    fn flush(&self, handle: &mut FileHandle) -> Result<()> {
        let fd = Self::fd(handle)?;
        let rc = unsafe { libc::fsync(fd) };
        if rc < 0 {
            return Err(IoreError::Io(Self::errno()));
        }
        Ok(())
    }

    fn close(&self, handle: FileHandle) -> Result<()> {
        let mut pfd = handle
            .into_inner::<PosixFd>()
            .ok_or(IoreError::InvalidArgument)?;
        let fd = std::mem::replace(&mut pfd.fd, -1);
        let rc = unsafe { libc::close(fd) };
        if rc < 0 {
            return Err(IoreError::Io(Self::errno()));
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let cpath = Self::path_to_cstring(path)?;
        let rc = unsafe { libc::unlink(cpath.as_ptr()) };
        if rc < 0 {
            let errno = Self::errno();
            if errno != libc::ENOENT {
                return Err(IoreError::Io(errno));
            }
            log::warn!("remove '{path}': no such file");
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let cpath = Self::path_to_cstring(path)?;
        let rc = unsafe { libc::mkdir(cpath.as_ptr(), DIR_MODE) };
        if rc < 0 {
            let errno = Self::errno();
            if errno != libc::EEXIST {
                return Err(IoreError::Io(errno));
            }
        }
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let cpath = Self::path_to_cstring(path)?;
        let rc = unsafe { libc::rmdir(cpath.as_ptr()) };
        if rc < 0 {
            return Err(IoreError::Io(Self::errno()));
        }
        Ok(())
    }
}
