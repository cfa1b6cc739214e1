//! Byte accounting shared by the partitioners and the backends.

use crate::error::{IoreError, Result};

/// Sizes resolved for one task and one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSizes {
    pub my_data_size: u64,
    /// Upper bound of a single request.
    pub my_req_size: u64,
    /// Bytes in the file this task accesses (the whole shared file in Nx1).
    pub file_size: u64,
    pub num_requests: u64,
}

/// `ceil(data_size / req_size)`.
pub fn num_requests(data_size: u64, req_size: u64) -> Result<u64> {
    if data_size == 0 {
        return Ok(0);
    }
    if req_size == 0 {
        return Err(IoreError::Partition(format!(
            "request size is zero with {data_size} bytes to move"
        )));
    }
    Ok(data_size.div_ceil(req_size))
}

/// Length of the request issued at `offset`.
///
/// Only the trailing request of a task, or one ending at the end of the
/// file, comes out shorter than `max_req`.
pub fn request_len(max_req: u64, file_size: u64, offset: u64, remaining: u64) -> u64 {
    max_req
        .min(file_size.saturating_sub(offset))
        .min(remaining)
}

/// Element `i` of a cyclic size list.
pub fn cyclic(sizes: &[u64], i: u32) -> u64 {
    if sizes.is_empty() {
        0
    } else {
        sizes[i as usize % sizes.len()]
    }
}

/// Sum of the cyclic list over tasks `0..count`; fails when it does not fit a `u64`.
pub fn cyclic_sum(sizes: &[u64], count: u32) -> Result<u64> {
    (0..count)
        .try_fold(0u64, |acc, i| acc.checked_add(cyclic(sizes, i)))
        .ok_or_else(|| {
            IoreError::Partition(format!("sizes of {count} tasks overflow a 64-bit file offset"))
        })
}

/// Walks an offset list and yields `(offset, len)` until the task's data
/// is exhausted.
#[derive(Debug, Clone)]
pub struct Requests<'a> {
    offsets: std::slice::Iter<'a, u64>,
    max_req: u64,
    file_size: u64,
    remaining: u64,
}

impl<'a> Requests<'a> {
    pub fn new(offsets: &'a [u64], sizes: &ResolvedSizes) -> Self {
        Self {
            offsets: offsets.iter(),
            max_req: sizes.my_req_size,
            file_size: sizes.file_size,
            remaining: sizes.my_data_size,
        }
    }

    /// Bytes not yet covered by a yielded request.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for Requests<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let offset = *self.offsets.next()?;
        let len = request_len(self.max_req, self.file_size, offset, self.remaining);
        if len == 0 {
            return None;
        }
        self.remaining -= len;
        Some((offset, len))
    }
}
