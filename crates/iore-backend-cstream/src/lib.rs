//! Buffered stream backend.
//!
//! Test files are driven through `BufWriter`/`BufReader` with an explicit
//! seek per request, so every transfer goes through a user-space buffer
//! before reaching the file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use iore_core::backend::Backend;
use iore_core::backend_options::BackendOptions;
use iore_core::comm::Collective;
use iore_core::error::{IoreError, Result};
use iore_core::handle::{FileHandle, OpenFlags};
use iore_core::test_spec::TestSpec;
use iore_core::workload::FileShareMode;

pub const DEFAULT_BUFFER_SIZE: usize = 8192;

enum Stream {
    Writer(BufWriter<File>),
    Reader(BufReader<File>),
}

/// Open stream plus the position it was left at.
struct CstreamFile {
    stream: Stream,
    pos: u64,
}

impl CstreamFile {
    fn seek_to(&mut self, offset: u64) -> Result<()> {
        if self.pos == offset {
            return Ok(());
        }
        match &mut self.stream {
            Stream::Writer(w) => w.seek(SeekFrom::Start(offset))?,
            Stream::Reader(r) => r.seek(SeekFrom::Start(offset))?,
        };
        self.pos = offset;
        Ok(())
    }
}

pub struct CstreamBackend {
    pub buffer_size: usize,
}

impl Default for CstreamBackend {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl CstreamBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_stream(&self, path: &str, flags: OpenFlags) -> Result<FileHandle> {
        let file = OpenOptions::new()
            .read(flags.intersects(OpenFlags::RDONLY | OpenFlags::RDWR))
            .write(flags.intersects(OpenFlags::WRONLY | OpenFlags::RDWR))
            .create(flags.contains(OpenFlags::CREAT))
            .truncate(flags.contains(OpenFlags::TRUNC))
            .open(path)
            .map_err(|e| {
                log::error!("open '{path}' failed: {e}");
                IoreError::from(e)
            })?;

        let stream = if flags.contains(OpenFlags::RDONLY) {
            Stream::Reader(BufReader::with_capacity(self.buffer_size, file))
        } else {
            Stream::Writer(BufWriter::with_capacity(self.buffer_size, file))
        };
        Ok(FileHandle::new(path, CstreamFile { stream, pos: 0 }))
    }

    fn file(handle: &mut FileHandle) -> Result<&mut CstreamFile> {
        handle
            .downcast_mut::<CstreamFile>()
            .ok_or(IoreError::InvalidArgument)
    }
}

impl Backend for CstreamBackend {
    fn name(&self) -> &str {
        "cstream"
    }

    fn configure(&mut self, opts: &BackendOptions) -> Result<()> {
        for (key, value) in opts.for_prefix("cstream") {
            match key {
                "buffer_size" => {
                    let size = value.as_u64("cstream.buffer_size")?;
                    if size == 0 {
                        return Err(IoreError::config(
                            "cstream.buffer_size",
                            "must be greater than zero",
                        ));
                    }
                    self.buffer_size = size as usize;
                }
                _ => log::warn!("cstream: ignoring unknown option '{key}'"),
            }
        }
        log::debug!("cstream: buffer_size={}", self.buffer_size);
        Ok(())
    }

    fn create(&self, path: &str, test: &TestSpec, comm: &dyn Collective) -> Result<FileHandle> {
        match test.file_mode {
            FileShareMode::PerTask => self.open_stream(path, OpenFlags::for_create()),
            FileShareMode::Shared => {
                let created = if comm.is_master() {
                    Some(self.open_stream(path, OpenFlags::for_create()))
                } else {
                    None
                };
                comm.barrier();
                match created {
                    Some(handle) => handle,
                    None => self.open_stream(path, OpenFlags::for_update()),
                }
            }
        }
    }

    fn open(&self, path: &str, _test: &TestSpec) -> Result<FileHandle> {
        self.open_stream(path, OpenFlags::for_read())
    }

    fn write_at(&self, handle: &mut FileHandle, buf: &[u8], offset: u64) -> Result<usize> {
        let file = Self::file(handle)?;
        file.seek_to(offset)?;
        let n = match &mut file.stream {
            Stream::Writer(w) => w.write(buf)?,
            Stream::Reader(_) => return Err(IoreError::PermissionDenied),
        };
        file.pos += n as u64;
        Ok(n)
    }

    fn read_at(&self, handle: &mut FileHandle, buf: &mut [u8], offset: u64) -> Result<usize> {
        let file = Self::file(handle)?;
        file.seek_to(offset)?;
        let n = match &mut file.stream {
            Stream::Reader(r) => r.read(buf)?,
            Stream::Writer(w) => {
                w.flush()?;
                w.get_mut().read(buf)?
            }
        };
        file.pos += n as u64;
        Ok(n)
    }

    /// Push buffered bytes to the OS.
    fn flush(&self, handle: &mut FileHandle) -> Result<()> {
        match &mut Self::file(handle)?.stream {
            Stream::Writer(w) => w.flush()?,
            Stream::Reader(_) => {}
        }
        Ok(())
    }

    fn close(&self, handle: FileHandle) -> Result<()> {
        let file = handle
            .into_inner::<CstreamFile>()
            .ok_or(IoreError::InvalidArgument)?;
        if let Stream::Writer(w) = file.stream {
            w.into_inner().map_err(|e| IoreError::from(e.into_error()))?;
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("remove '{path}': no such file");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
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
