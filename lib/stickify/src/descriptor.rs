// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tensor descriptors.
//!
//! A [`PreTransformedDescriptor`] describes the logical, row-major tensor the
//! caller owns. A [`TransformedDescriptor`] describes the physical stick layout
//! and is only ever produced by the [`LayoutResolver`](crate::layout::LayoutResolver).

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::config::StickGeometry;
use crate::layout::ConcatInfo;
use crate::status::{Result, StickifyError};

/// Element type of a tensor. Elements are copied bit-exact; no casting is performed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum ElementType {
    #[strum(serialize = "FP16")]
    Fp16,
    #[strum(serialize = "BFLOAT")]
    Bfloat,
    #[strum(serialize = "DLFLOAT16")]
    Dlfloat16,
    #[strum(serialize = "FP32")]
    Fp32,
    #[strum(serialize = "INT8")]
    Int8,
    #[strum(serialize = "INT32")]
    Int32,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElementType::Int8 => 1,
            ElementType::Fp16 | ElementType::Bfloat | ElementType::Dlfloat16 => 2,
            ElementType::Fp32 | ElementType::Int32 => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        !matches!(self, ElementType::Int8 | ElementType::Int32)
    }

    /// Parse an element type tag such as `"FP32"`.
    pub fn parse(tag: &str) -> Result<Self> {
        tag.parse()
            .map_err(|_| StickifyError::InvalidType(format!("unknown element type '{tag}'")))
    }
}

/// Layout tag of a tensor.
///
/// The first ten variants describe logical tensors; `NHWC` and `HWCK` double as
/// physical layouts. `FICO`, `ZRH` and the `BIDIR_*` variants only appear on
/// transformed descriptors produced by gate concatenation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Layout {
    #[strum(serialize = "1D")]
    D1,
    #[strum(serialize = "2D")]
    D2,
    #[strum(serialize = "2DS")]
    D2s,
    #[strum(serialize = "3D")]
    D3,
    #[strum(serialize = "3DS")]
    D3s,
    #[strum(serialize = "4D")]
    D4,
    #[strum(serialize = "4DS")]
    D4s,
    #[strum(serialize = "NHWC")]
    Nhwc,
    #[strum(serialize = "NCHW")]
    Nchw,
    #[strum(serialize = "HWCK")]
    Hwck,
    #[strum(serialize = "FICO")]
    Fico,
    #[strum(serialize = "ZRH")]
    Zrh,
    #[strum(serialize = "BIDIR_FICO")]
    BidirFico,
    #[strum(serialize = "BIDIR_ZRH")]
    BidirZrh,
}

impl Layout {
    /// Number of logical dimensions a tensor with this layout carries.
    pub fn rank(&self) -> usize {
        match self {
            Layout::D1 => 1,
            Layout::D2 | Layout::D2s => 2,
            Layout::D3 | Layout::D3s => 3,
            _ => 4,
        }
    }

    /// Whether the layout is produced only by gate concatenation.
    pub fn is_concatenated(&self) -> bool {
        matches!(
            self,
            Layout::Fico | Layout::Zrh | Layout::BidirFico | Layout::BidirZrh
        )
    }

    /// Parse a layout tag such as `"2DS"`.
    pub fn parse(tag: &str) -> Result<Self> {
        tag.parse()
            .map_err(|_| StickifyError::InvalidLayout(format!("unknown layout '{tag}'")))
    }
}

/// Physical data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum DataFormat {
    /// `[N, H, W, C]`: sticks run along C, pages along W.
    Feature,
    /// `[H, W, C, K]`: sticks run along K, pages along C.
    Kernel,
}

/// Logical description of a caller-owned tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Getters)]
pub struct PreTransformedDescriptor {
    #[getter(copy)]
    layout: Layout,

    #[getter(copy)]
    element_type: ElementType,

    shape: Vec<usize>,
}

impl PreTransformedDescriptor {
    /// Create a descriptor, validating the shape against the layout's rank.
    pub fn new(layout: Layout, element_type: ElementType, shape: &[usize]) -> Result<Self> {
        if shape.is_empty() {
            return Err(StickifyError::InvalidFormat("shape must not be empty".into()));
        }
        if let Some(axis) = shape.iter().position(|&dim| dim == 0) {
            return Err(StickifyError::InvalidFormat(format!(
                "dimension {axis} of shape {shape:?} is zero"
            )));
        }
        if shape.len() != layout.rank() {
            return Err(StickifyError::InvalidFormat(format!(
                "layout {layout} expects rank {}, got shape {shape:?}",
                layout.rank()
            )));
        }

        Ok(Self {
            layout,
            element_type,
            shape: shape.to_vec(),
        })
    }

    /// Create a descriptor from string tags, e.g. `("3DS", "FP32", &[2, 8, 16])`.
    pub fn from_tags(layout: &str, element_type: &str, shape: &[usize]) -> Result<Self> {
        let layout = Layout::parse(layout)?;
        let element_type = ElementType::parse(element_type)?;
        Self::new(layout, element_type, shape)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Shape left-padded with ones to four dimensions.
    pub fn dims4(&self) -> [usize; 4] {
        let mut dims = [1; 4];
        dims[4 - self.shape.len()..].copy_from_slice(&self.shape);
        dims
    }

    /// Total number of logical elements.
    pub fn num_elements(&self) -> Result<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                StickifyError::ConversionFailure(format!(
                    "element count of shape {:?} overflows",
                    self.shape
                ))
            })
    }

    /// Size in bytes of the logical, row-major data.
    pub fn size_bytes(&self) -> Result<usize> {
        self.num_elements()?
            .checked_mul(self.element_type.size())
            .ok_or_else(|| {
                StickifyError::ConversionFailure(format!(
                    "byte size of shape {:?} overflows",
                    self.shape
                ))
            })
    }
}

/// Physical description of a stickified tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct TransformedDescriptor {
    /// The logical descriptor this layout was resolved from
    source: PreTransformedDescriptor,

    /// Physical layout tag (`NHWC`, `HWCK`, `FICO`, ...)
    #[getter(copy)]
    layout: Layout,

    #[getter(copy)]
    format: DataFormat,

    /// Physical dimensions, outermost first: `[dim4, dim3, dim2, dim1]`
    #[getter(copy)]
    dims: [usize; 4],

    #[getter(copy)]
    element_type: ElementType,

    /// Total physical size in bytes, padding included
    #[getter(copy)]
    size_bytes: usize,

    concat: Option<ConcatInfo>,

    #[getter(copy)]
    geometry: StickGeometry,
}

impl TransformedDescriptor {
    pub(crate) fn new(
        source: PreTransformedDescriptor,
        layout: Layout,
        format: DataFormat,
        dims: [usize; 4],
        size_bytes: usize,
        concat: Option<ConcatInfo>,
        geometry: StickGeometry,
    ) -> Self {
        let element_type = source.element_type();
        Self {
            source,
            layout,
            format,
            dims,
            element_type,
            size_bytes,
            concat,
            geometry,
        }
    }

    /// Layout tag of the source tensor.
    pub fn source_layout(&self) -> Layout {
        self.source.layout()
    }

    /// Number of logical source buffers stickify expects.
    pub fn arity(&self) -> usize {
        self.concat
            .as_ref()
            .map(|info| info.rnn_type().gate_count())
            .unwrap_or(1)
    }

    /// Elements carried by one stick for this tensor's element type.
    pub fn elements_per_stick(&self) -> usize {
        self.geometry.stick_bytes / self.element_type.size()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| StickifyError::InvalidFormat(format!("serialize descriptor: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| StickifyError::InvalidFormat(format!("deserialize descriptor: {e}")))
    }
}
