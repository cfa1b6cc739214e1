use std::any::Any;

use bitflags::bitflags;

/// Opaque file handle wrapping backend-specific state.
pub struct FileHandle {
    path: String,
    inner: Box<dyn Any + Send + Sync>,
}

impl FileHandle {
    pub fn new<T: Any + Send + Sync>(path: &str, value: T) -> Self {
        Self {
            path: path.to_string(),
            inner: Box::new(value),
        }
    }

    /// Path the handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.downcast_mut::<T>()
    }

    /// Recover the backend state, e.g. to close it.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.inner.downcast::<T>().ok().map(|b| *b)
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle").field("path", &self.path).finish()
    }
}

bitflags! {
    /// Access mode requested when a backend opens a test file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY  = 0x01;
        const WRONLY  = 0x02;
        const RDWR    = 0x04;
        const CREAT   = 0x10;
        const TRUNC   = 0x20;
        /// Bypass I/O buffers (O_DIRECT)
        const DIRECT  = 0x80;
    }
}

impl OpenFlags {
    /// Flags for the task that creates a test file.
    pub fn for_create() -> Self {
        OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::RDWR
    }

    /// Flags for tasks joining a shared file another task created.
    pub fn for_update() -> Self {
        OpenFlags::RDWR
    }

    pub fn for_read() -> Self {
        OpenFlags::RDONLY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_downcast() {
        let mut h = FileHandle::new("/tmp/x", 7u32);
        assert_eq!(h.path(), "/tmp/x");
        assert_eq!(h.downcast_ref::<u32>(), Some(&7));
        assert!(h.downcast_ref::<i64>().is_none());
        *h.downcast_mut::<u32>().unwrap() = 9;
        assert_eq!(h.into_inner::<u32>(), Some(9));
    }

    #[test]
    fn test_create_flags() {
        assert!(OpenFlags::for_create().contains(OpenFlags::TRUNC));
        assert!(!OpenFlags::for_update().contains(OpenFlags::CREAT));
    }
}
