// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Storage actions.

use super::MemoryRegion;
use crate::status::StickifyError;

/// Extension trait for storage types that support memory setting operations
pub trait Memset: MemoryRegion {
    /// Sets a region of memory to a specific value
    ///
    /// # Arguments
    /// * `value` - The byte value to write
    /// * `offset` - Offset in bytes from the start of the storage
    /// * `size` - Number of bytes to set
    fn memset(&mut self, value: u8, offset: usize, size: usize) -> Result<(), StickifyError>;
}

/// Extension trait for storage types that support slicing operations
pub trait Slice {
    /// Returns an immutable byte slice view of the entire storage region
    fn as_slice(&self) -> Result<&[u8], StickifyError>;

    /// Returns an immutable byte slice view of a subregion
    fn slice(&self, offset: usize, len: usize) -> Result<&[u8], StickifyError> {
        let slice = self.as_slice()?;
        slice
            .get(offset..offset.saturating_add(len))
            .filter(|s| s.len() == len)
            .ok_or_else(|| {
                StickifyError::InvalidBuffer(format!(
                    "slice [{offset}, +{len}) out of bounds of {} bytes",
                    slice.len()
                ))
            })
    }

    /// Returns a typed view of the entire storage region.
    ///
    /// Fails when the storage is not aligned for `T` or its size is not a
    /// multiple of `size_of::<T>()`.
    fn as_slice_typed<T: bytemuck::Pod>(&self) -> Result<&[T], StickifyError> {
        bytemuck::try_cast_slice(self.as_slice()?)
            .map_err(|e| StickifyError::InvalidBuffer(format!("typed view: {e}")))
    }
}

pub trait SliceMut {
    /// Returns a mutable byte slice view of the entire storage region
    fn as_slice_mut(&mut self) -> Result<&mut [u8], StickifyError>;

    /// Returns a mutable byte slice view of a subregion
    fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], StickifyError> {
        let slice = self.as_slice_mut()?;
        let total = slice.len();
        slice
            .get_mut(offset..offset.saturating_add(len))
            .filter(|s| s.len() == len)
            .ok_or_else(|| {
                StickifyError::InvalidBuffer(format!(
                    "slice [{offset}, +{len}) out of bounds of {total} bytes"
                ))
            })
    }
}
