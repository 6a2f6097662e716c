// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! System memory storage backed by `posix_memalign`.

use super::{MemoryRegion, actions};
use crate::status::{Result, StickifyError};
use std::ptr::NonNull;

use nix::libc;

/// Zero-initialised, aligned system memory.
#[derive(Debug)]
pub struct SystemStorage {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

// SAFETY: the storage exclusively owns its allocation.
unsafe impl Send for SystemStorage {}
unsafe impl Sync for SystemStorage {}

impl SystemStorage {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    ///
    /// `alignment` must be a power of two and a multiple of the pointer size.
    pub fn new(len: usize, alignment: usize) -> Result<Self> {
        if len == 0 {
            return Err(StickifyError::InvalidBuffer(
                "zero-sized allocations are not supported".into(),
            ));
        }
        let alignment = alignment.max(std::mem::size_of::<*mut libc::c_void>());

        let mut ptr: *mut libc::c_void = std::ptr::null_mut();

        // SAFETY: posix_memalign writes a valid pointer or leaves it untouched on failure.
        let result = unsafe { libc::posix_memalign(&mut ptr, alignment, len) };
        if result != 0 {
            return Err(StickifyError::InvalidBuffer(format!(
                "posix_memalign failed for size {} (alignment {}): errno {}",
                len, alignment, result
            )));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            StickifyError::InvalidBuffer(format!("allocation failed for size {}", len))
        })?;

        // Padding must read back as zero.
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, len);
        }

        Ok(Self {
            ptr,
            len,
            alignment,
        })
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Drop for SystemStorage {
    fn drop(&mut self) {
        // SAFETY: pointer was allocated by posix_memalign.
        unsafe {
            libc::free(self.ptr.as_ptr() as *mut libc::c_void);
        }
    }
}

impl MemoryRegion for SystemStorage {
    fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    fn size(&self) -> usize {
        self.len
    }
}

impl actions::Memset for SystemStorage {
    fn memset(&mut self, value: u8, offset: usize, size: usize) -> Result<()> {
        if offset.checked_add(size).is_none_or(|end| end > self.len) {
            return Err(StickifyError::InvalidBuffer(
                "memset: offset + size > storage size".into(),
            ));
        }
        unsafe {
            let ptr = self.ptr.as_ptr().add(offset);
            std::ptr::write_bytes(ptr, value, size);
        }
        Ok(())
    }
}

impl actions::Slice for SystemStorage {
    fn as_slice(&self) -> Result<&[u8]> {
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) })
    }
}

impl actions::SliceMut for SystemStorage {
    fn as_slice_mut(&mut self) -> Result<&mut [u8]> {
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }
}
