use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;

use crate::error::{IoreError, Result};

/// Zero-filled transfer buffer with a caller-chosen alignment.
///
/// Backends opening files with `O_DIRECT` need the memory aligned to the
/// page size; everyone else asks for an alignment of 1.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

impl AlignedBuffer {
    /// `align` must be a power of two.
    pub fn new(len: usize, align: usize) -> Result<Self> {
        // Zero-sized allocations are not allowed; keep one byte in reserve.
        let layout = Layout::from_size_align(len.max(1), align).map_err(|_| {
            IoreError::config("buffer", format!("invalid alignment {align} for {len} bytes"))
        })?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Ok(Self { ptr, layout, len })
    }

    /// Buffer with every byte set to `byte`.
    pub fn filled(len: usize, align: usize, byte: u8) -> Result<Self> {
        let mut buf = Self::new(len, align)?;
        buf.fill(byte);
        Ok(buf)
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

/// System page size, the alignment `O_DIRECT` expects.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

impl std::ops::Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl std::ops::DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}

// SAFETY: the buffer owns its allocation exclusively.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
