// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Physical buffer management.
//!
//! - [`SystemStorage`] owns aligned, zero-initialised host memory
//! - [`PhysicalTensor`] pairs that storage with its transformed descriptor and
//!   tracks the tensor's lifecycle
//! - [`BufferManager`] allocates, resets and releases physical tensors
//!
//! Each physical tensor exclusively owns its storage; there is no aliasing
//! between tensors and no implicit resizing.

pub mod actions;

mod system;


pub use system::SystemStorage;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::instrument;

use crate::config::{DEFAULT_BUFFER_ALIGNMENT, StickifyConfig};
use crate::descriptor::{PreTransformedDescriptor, TransformedDescriptor};
use crate::status::{Result, StickifyError};
use actions::{Memset, Slice};

/// Core trait for memory regions.
pub trait MemoryRegion: Send + Sync + fmt::Debug {
    /// Base address of the memory region.
    fn addr(&self) -> usize;

    /// Size of the memory region in bytes.
    fn size(&self) -> usize;
}

/// Lifecycle stage of a [`PhysicalTensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TensorState {
    /// Zeroed and ready to receive data
    Allocated,
    /// Holds converted data
    Stickified,
    /// A conversion failed part way; contents are unspecified
    Corrupted,
    /// Storage has been returned
    Released,
}

/// A physical, stick-format tensor and the storage backing it.
#[derive(Debug)]
pub struct PhysicalTensor {
    descriptor: TransformedDescriptor,
    storage: Option<SystemStorage>,
    state: TensorState,
}

impl PhysicalTensor {
    pub fn descriptor(&self) -> &TransformedDescriptor {
        &self.descriptor
    }

    pub fn pre_transformed(&self) -> &PreTransformedDescriptor {
        self.descriptor.source()
    }

    pub fn state(&self) -> TensorState {
        self.state
    }

    pub fn is_stickified(&self) -> bool {
        self.state == TensorState::Stickified
    }

    pub fn size_bytes(&self) -> usize {
        self.descriptor.size_bytes()
    }

    /// Address of the first byte, or `None` once released.
    pub fn addr(&self) -> Option<usize> {
        self.storage.as_ref().map(|s| s.addr())
    }

    /// Read-only view of the physical bytes, padding included.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.storage()?.as_slice()
    }

    pub(crate) fn storage(&self) -> Result<&SystemStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| StickifyError::InvalidState("tensor has been released".into()))
    }

    pub(crate) fn storage_mut(&mut self) -> Result<&mut SystemStorage> {
        self.storage
            .as_mut()
            .ok_or_else(|| StickifyError::InvalidState("tensor has been released".into()))
    }

    pub(crate) fn set_state(&mut self, state: TensorState) {
        self.state = state;
    }
}

impl Slice for PhysicalTensor {
    fn as_slice(&self) -> Result<&[u8]> {
        self.as_bytes()
    }
}

/// Allocates and releases physical tensors.
#[derive(Debug, Clone, Copy)]
pub struct BufferManager {
    alignment: usize,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_BUFFER_ALIGNMENT,
        }
    }
}

impl BufferManager {
    pub fn new(alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(StickifyError::InvalidFormat(format!(
                "buffer alignment {alignment} is not a power of two"
            )));
        }
        Ok(Self { alignment })
    }

    pub fn from_config(config: &StickifyConfig) -> Result<Self> {
        Self::new(config.buffer_alignment)
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Allocate zeroed storage sized for `descriptor`.
    #[instrument(level = "debug", skip(self, descriptor), fields(layout = %descriptor.layout(), size = descriptor.size_bytes()))]
    pub fn allocate(&self, descriptor: &TransformedDescriptor) -> Result<PhysicalTensor> {
        let storage = SystemStorage::new(descriptor.size_bytes(), self.alignment)?;
        tracing::debug!(
            addr = storage.addr(),
            alignment = storage.alignment(),
            "allocated physical tensor"
        );
        Ok(PhysicalTensor {
            descriptor: descriptor.clone(),
            storage: Some(storage),
            state: TensorState::Allocated,
        })
    }

    /// Return the tensor's storage. Releasing twice is an invalid-state error.
    pub fn release(&self, tensor: &mut PhysicalTensor) -> Result<()> {
        match tensor.storage.take() {
            Some(storage) => {
                tracing::debug!(
                    addr = storage.addr(),
                    size = storage.size(),
                    "released physical tensor"
                );
                drop(storage);
                tensor.state = TensorState::Released;
                Ok(())
            }
            None => Err(StickifyError::InvalidState(
                "tensor has already been released".into(),
            )),
        }
    }

    /// Zero the tensor and make it writable again.
    pub fn reset(&self, tensor: &mut PhysicalTensor) -> Result<()> {
        let storage = tensor.storage_mut()?;
        let len = storage.size();
        storage.memset(0, 0, len)?;
        tensor.state = TensorState::Allocated;
        Ok(())
    }
}
