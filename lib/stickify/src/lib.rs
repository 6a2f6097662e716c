// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NNPA Stickify
//!
//! Converts logical, row-major tensors into the stick-interleaved physical
//! layout consumed by the NNPA accelerator, and manages the buffers holding
//! the converted data.
//!
//! ```text
//! PreTransformedDescriptor --LayoutResolver--> TransformedDescriptor
//!     --BufferManager--> PhysicalTensor --Stickifier--> stickified bytes
//! ```

pub mod config;
pub mod descriptor;
pub mod layout;
pub mod logging;
pub mod memory;
pub mod status;
pub mod stickify;

pub use config::{StickGeometry, StickifyConfig};
pub use descriptor::{
    DataFormat, ElementType, Layout, PreTransformedDescriptor, TransformedDescriptor,
};
pub use layout::{
    ConcatInfo, ConcatSegment, ConcatUsage, Gate, LayoutResolver, PrevLayer, RnnType,
};
pub use memory::{BufferManager, PhysicalTensor, TensorState};
pub use status::{Result, StatusCode, StickifyError};
pub use stickify::Stickifier;
