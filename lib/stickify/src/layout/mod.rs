// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Layout resolution.
//!
//! Maps a [`PreTransformedDescriptor`] onto the stick-interleaved physical
//! layout and computes its padded size:
//!
//! - The innermost physical dimension is split into sticks of
//!   `stick_bytes / element_size` elements. A partial stick is padded.
//! - The paged dimension (W for feature tensors, C for kernels) is padded to
//!   a whole number of pages of `sticks_per_page` sticks.
//! - Concatenated gate tensors are each padded to whole sticks *before* being
//!   laid side by side, so every gate starts on a stick boundary.
//!
//! Resolution is pure: the same input always yields the same descriptor.

mod concat;
pub(crate) mod mapping;


pub use concat::{ConcatInfo, ConcatSegment, ConcatUsage, Gate, PrevLayer, RnnType};

use tracing::instrument;
use validator::Validate;

use crate::config::{StickGeometry, StickifyConfig};
use crate::descriptor::{
    DataFormat, ElementType, Layout, PreTransformedDescriptor, TransformedDescriptor,
};
use crate::status::{Result, StickifyError};
use mapping::{StickAddressing, pad_to, units};

/// Computes transformed descriptors for a fixed stick geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutResolver {
    geometry: StickGeometry,
}

impl LayoutResolver {
    pub fn new(geometry: StickGeometry) -> Result<Self> {
        geometry
            .validate()
            .map_err(|e| StickifyError::InvalidFormat(format!("stick geometry: {e}")))?;
        Ok(Self { geometry })
    }

    pub fn from_config(config: &StickifyConfig) -> Result<Self> {
        Self::new(config.geometry)
    }

    pub fn geometry(&self) -> &StickGeometry {
        &self.geometry
    }

    /// Check that `desc` is exactly what resolving its source under its own
    /// geometry produces.
    pub fn verify(desc: &TransformedDescriptor) -> Result<()> {
        let resolver = Self::new(desc.geometry())?;
        let resolved = match desc.concat() {
            Some(info) => resolver.resolve_concatenated(desc.source(), *info)?,
            None => resolver.resolve(desc.source())?,
        };
        if &resolved != desc {
            return Err(StickifyError::InvalidLayout(format!(
                "{} descriptor with dims {:?} does not match the layout of its {} source",
                desc.layout(),
                desc.dims(),
                desc.source_layout()
            )));
        }
        Ok(())
    }

    /// Resolve the physical layout of a single logical tensor.
    #[instrument(level = "debug", skip(self, pre), fields(layout = %pre.layout(), shape = ?pre.shape()))]
    pub fn resolve(&self, pre: &PreTransformedDescriptor) -> Result<TransformedDescriptor> {
        let e = self.elements_per_stick(pre.element_type())?;
        let [d4, d3, d2, d1] = pre.dims4();

        let (layout, format, dims) = match pre.layout() {
            Layout::D1 | Layout::D2 | Layout::D3 | Layout::D4 | Layout::Nhwc => {
                (Layout::Nhwc, DataFormat::Feature, [d4, d3, d2, d1])
            }
            Layout::D2s => (Layout::Nhwc, DataFormat::Feature, [d2, 1, 1, d1]),
            Layout::D3s => (Layout::Nhwc, DataFormat::Feature, [d3, 1, d2, d1]),
            Layout::Nchw => (Layout::Nhwc, DataFormat::Feature, [d4, d2, d1, d3]),
            Layout::D4s => {
                // [timesteps, directions, batch, hidden]
                let inner = match d3 {
                    1 => d1,
                    2 => pad_to(d1, e)
                        .and_then(|v| v.checked_mul(2))
                        .ok_or_else(|| dim_overflow(pre))?,
                    dirs => {
                        return Err(StickifyError::InvalidFormat(format!(
                            "4DS tensors carry 1 or 2 directions, got {dirs}"
                        )));
                    }
                };
                (Layout::Nhwc, DataFormat::Feature, [d4, 1, d2, inner])
            }
            Layout::Hwck => (Layout::Hwck, DataFormat::Kernel, [d4, d3, d2, d1]),
            layout @ (Layout::Fico | Layout::Zrh | Layout::BidirFico | Layout::BidirZrh) => {
                return Err(StickifyError::InvalidLayout(format!(
                    "{layout} is only produced by gate concatenation"
                )));
            }
        };

        self.finish(pre, layout, format, dims, None)
    }

    /// Resolve the physical layout of gate tensors fused along the innermost axis.
    ///
    /// `pre` describes one gate; all gates share its shape.
    #[instrument(level = "debug", skip(self, pre), fields(layout = %pre.layout(), shape = ?pre.shape()))]
    pub fn resolve_concatenated(
        &self,
        pre: &PreTransformedDescriptor,
        info: ConcatInfo,
    ) -> Result<TransformedDescriptor> {
        if !pre.element_type().is_float() {
            return Err(StickifyError::InvalidType(format!(
                "gate tensors must be floating point, got {}",
                pre.element_type()
            )));
        }
        let e = self.elements_per_stick(pre.element_type())?;

        let expected = info.usage().source_layout();
        if pre.layout() != expected {
            return Err(StickifyError::InvalidLayout(format!(
                "{} gates require layout {expected}, got {}",
                info.usage(),
                pre.layout()
            )));
        }
        if info.prev_layer() == PrevLayer::Bidir && info.usage() != ConcatUsage::Weights {
            return Err(StickifyError::InvalidLayout(format!(
                "a bidirectional previous layer only applies to input weights, not {}",
                info.usage()
            )));
        }

        let gates = info.rnn_type().gate_count();
        let [_, d3, d2, d1] = pre.dims4();
        let inner = pad_to(d1, e)
            .and_then(|v| v.checked_mul(gates))
            .ok_or_else(|| dim_overflow(pre))?;

        let dims = match pre.layout() {
            Layout::D2s => [d2, 1, 1, inner],
            _ => {
                let rows = if info.is_bidir_weights() {
                    if d2 % 2 != 0 {
                        return Err(StickifyError::InvalidFormat(format!(
                            "bidirectional input weights need an even row count, got {d2}"
                        )));
                    }
                    pad_to(d2 / 2, e)
                        .and_then(|v| v.checked_mul(2))
                        .ok_or_else(|| dim_overflow(pre))?
                } else {
                    d2
                };
                [d3, 1, rows, inner]
            }
        };

        self.finish(
            pre,
            info.physical_layout(),
            DataFormat::Feature,
            dims,
            Some(info),
        )
    }

    /// Parse tags, build the descriptor and resolve it in one step.
    pub fn resolve_tags(
        &self,
        layout: &str,
        element_type: &str,
        shape: &[usize],
    ) -> Result<TransformedDescriptor> {
        let pre = PreTransformedDescriptor::from_tags(layout, element_type, shape)?;
        self.resolve(&pre)
    }

    fn elements_per_stick(&self, element_type: ElementType) -> Result<usize> {
        self.geometry
            .elements_per_stick(element_type.size())
            .ok_or_else(|| {
                StickifyError::InvalidType(format!(
                    "{element_type} elements do not tile a {}-byte stick",
                    self.geometry.stick_bytes
                ))
            })
    }

    fn finish(
        &self,
        pre: &PreTransformedDescriptor,
        layout: Layout,
        format: DataFormat,
        dims: [usize; 4],
        concat: Option<ConcatInfo>,
    ) -> Result<TransformedDescriptor> {
        if let Some(dim) = dims.iter().find(|&&d| d > self.geometry.max_dim_size) {
            return Err(StickifyError::InvalidFormat(format!(
                "physical dimension {dim} exceeds the maximum of {}",
                self.geometry.max_dim_size
            )));
        }

        let e = self.elements_per_stick(pre.element_type())?;
        let p = self.geometry.sticks_per_page;
        let page_bytes = self.geometry.page_bytes().ok_or_else(|| {
            StickifyError::ConversionFailure(format!(
                "page of {} sticks of {} bytes overflows",
                p, self.geometry.stick_bytes
            ))
        })?;
        let size_bytes = match format {
            DataFormat::Feature => {
                let [n, h, w, c] = dims;
                n.checked_mul(units(c, e))
                    .and_then(|v| v.checked_mul(h))
                    .and_then(|v| v.checked_mul(units(w, p)))
                    .and_then(|v| v.checked_mul(page_bytes))
            }
            DataFormat::Kernel => {
                let [h, w, c, k] = dims;
                units(k, e)
                    .checked_mul(h)
                    .and_then(|v| v.checked_mul(w))
                    .and_then(|v| v.checked_mul(units(c, p)))
                    .and_then(|v| v.checked_mul(page_bytes))
            }
        }
        .ok_or_else(|| {
            StickifyError::ConversionFailure(format!(
                "physical size of dims {dims:?} overflows"
            ))
        })?;

        tracing::debug!(
            source = %pre.layout(),
            physical = %layout,
            ?dims,
            size_bytes,
            "resolved transformed descriptor"
        );

        Ok(TransformedDescriptor::new(
            pre.clone(),
            layout,
            format,
            dims,
            size_bytes,
            concat,
            self.geometry,
        ))
    }
}

impl TransformedDescriptor {
    /// Placement of each gate of a concatenated tensor, in declared order.
    ///
    /// Returns an empty list for tensors that are not concatenated. The
    /// descriptor must be one its resolver would produce; a hand-edited one
    /// is rejected before any offset is computed.
    pub fn concat_segments(&self) -> Result<Vec<ConcatSegment>> {
        let Some(info) = self.concat() else {
            return Ok(Vec::new());
        };
        LayoutResolver::verify(self)?;

        let addressing = StickAddressing::new(self);
        let e = addressing.elements_per_stick();
        let padded_width = pad_to(self.source().dims4()[3], e).ok_or_else(|| {
            StickifyError::ConversionFailure(format!(
                "gate width {} overflows when padded to whole sticks",
                self.source().dims4()[3]
            ))
        })?;

        info.gates()
            .iter()
            .enumerate()
            .map(|(index, &gate)| {
                let first_element = index
                    .checked_mul(padded_width)
                    .filter(|&first| first < self.dims()[3]);
                let byte_offset =
                    first_element.and_then(|first| addressing.offset([0, 0, 0, first]));
                match (first_element, byte_offset) {
                    (Some(first_element), Some(byte_offset)) => Ok(ConcatSegment {
                        gate,
                        index,
                        first_element,
                        padded_width,
                        byte_offset,
                    }),
                    _ => Err(StickifyError::ConversionFailure(format!(
                        "gate {gate} of a {} tensor has no physical offset",
                        self.layout()
                    ))),
                }
            })
            .collect()
    }
}

fn dim_overflow(pre: &PreTransformedDescriptor) -> StickifyError {
    StickifyError::ConversionFailure(format!(
        "padded dimensions of shape {:?} overflow",
        pre.shape()
    ))
}
