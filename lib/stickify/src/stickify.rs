// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stickification engine.
//!
//! Copies logical, row-major source buffers into the physical buffer of a
//! [`PhysicalTensor`], and back again. Every precondition is checked before the
//! first byte is written, so a rejected call leaves the tensor untouched. Only
//! a failure during the copy itself marks the tensor as corrupted.
//!
//! Feature-format tensors are partitioned into independent slabs along the
//! outermost physical axis. Large tensors with more than one slab are copied
//! on the rayon pool with one worker per slab; no two workers share a byte.

use bytemuck::Pod;
use rayon::prelude::*;
use tracing::instrument;

use crate::config::{DEFAULT_PARALLEL_MIN_BYTES, StickifyConfig};
use crate::descriptor::TransformedDescriptor;
use crate::layout::LayoutResolver;
use crate::layout::mapping::{Run, SourcePlan, StickAddressing, source_plans};
use crate::memory::actions::SliceMut;
use crate::memory::{PhysicalTensor, TensorState};
use crate::status::{Result, StickifyError};

/// Moves data between logical buffers and physical tensors.
#[derive(Debug, Clone, Copy)]
pub struct Stickifier {
    parallel: bool,
    parallel_min_bytes: usize,
}

impl Default for Stickifier {
    fn default() -> Self {
        Self {
            parallel: true,
            parallel_min_bytes: DEFAULT_PARALLEL_MIN_BYTES,
        }
    }
}

impl Stickifier {
    pub fn new(parallel: bool, parallel_min_bytes: usize) -> Self {
        Self {
            parallel,
            parallel_min_bytes,
        }
    }

    pub fn from_config(config: &StickifyConfig) -> Self {
        Self::new(config.parallel, config.parallel_min_bytes)
    }

    /// A stickifier that always copies on the calling thread.
    pub fn sequential() -> Self {
        Self::new(false, usize::MAX)
    }

    /// Write `sources` into `tensor`.
    ///
    /// Plain tensors take exactly one source; concatenated tensors take one
    /// source per gate, in gate order. Each source must hold exactly the
    /// logical element count times the element size.
    #[instrument(level = "debug", skip_all, fields(layout = %tensor.descriptor().layout(), sources = sources.len()))]
    pub fn stickify(&self, tensor: &mut PhysicalTensor, sources: &[&[u8]]) -> Result<()> {
        let desc = tensor.descriptor().clone();
        let plans = prepare(&desc, sources.iter().map(|s| s.len()))?;

        match tensor.state() {
            TensorState::Allocated => {}
            state => {
                return Err(StickifyError::InvalidState(format!(
                    "stickify requires an allocated tensor, found {state}"
                )));
            }
        }

        let addressing = StickAddressing::new(&desc);
        let dst = tensor.storage_mut()?.as_slice_mut()?;

        let copied = match addressing.slab_bytes() {
            Some(slab) if self.parallel_for(&desc, slab) => {
                tracing::trace!(slabs = desc.dims()[0], slab, "parallel stickify");
                dst.par_chunks_mut(slab)
                    .enumerate()
                    .try_for_each(|(n, chunk)| {
                        write_runs(&plans, sources, &addressing, Some(n), n * slab, chunk)
                    })
            }
            _ => write_runs(&plans, sources, &addressing, None, 0, dst),
        };

        match copied {
            Ok(()) => {
                tensor.set_state(TensorState::Stickified);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "stickify failed; tensor contents are unspecified");
                if e.invalidates_buffer() {
                    tensor.set_state(TensorState::Corrupted);
                }
                Err(e)
            }
        }
    }

    /// [`Stickifier::stickify`] over typed sources.
    ///
    /// `T` must have the same size as the tensor's element type.
    pub fn stickify_typed<T: Pod>(&self, tensor: &mut PhysicalTensor, sources: &[&[T]]) -> Result<()> {
        check_element_size::<T>(tensor.descriptor())?;
        let bytes: Vec<&[u8]> = sources.iter().map(|s| bytemuck::cast_slice::<T, u8>(s)).collect();
        self.stickify(tensor, &bytes)
    }

    /// Read a stickified tensor back into logical, row-major `outputs`.
    #[instrument(level = "debug", skip_all, fields(layout = %tensor.descriptor().layout(), outputs = outputs.len()))]
    pub fn unstickify(&self, tensor: &PhysicalTensor, outputs: &mut [&mut [u8]]) -> Result<()> {
        let desc = tensor.descriptor();
        let plans = prepare(desc, outputs.iter().map(|o| o.len()))?;

        if !tensor.is_stickified() {
            return Err(StickifyError::InvalidState(format!(
                "unstickify requires a stickified tensor, found {}",
                tensor.state()
            )));
        }

        let addressing = StickAddressing::new(desc);
        let src = tensor.as_bytes()?;
        for (plan, output) in plans.iter().zip(outputs.iter_mut()) {
            plan.for_each_run(&addressing, None, 0, |run| {
                let from = physical(src, run)?;
                let to = output
                    .get_mut(run.src..run.src + run.len)
                    .ok_or_else(|| out_of_range(run))?;
                to.copy_from_slice(from);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// [`Stickifier::unstickify`] into typed outputs.
    pub fn unstickify_typed<T: Pod>(&self, tensor: &PhysicalTensor, outputs: &mut [&mut [T]]) -> Result<()> {
        check_element_size::<T>(tensor.descriptor())?;
        let mut bytes: Vec<&mut [u8]> = outputs
            .iter_mut()
            .map(|o| bytemuck::cast_slice_mut::<T, u8>(&mut **o))
            .collect();
        self.unstickify(tensor, &mut bytes)
    }

    fn parallel_for(&self, desc: &TransformedDescriptor, slab: usize) -> bool {
        self.parallel && desc.dims()[0] > 1 && slab > 0 && desc.size_bytes() >= self.parallel_min_bytes
    }
}

/// Validate a descriptor and the lengths of the logical buffers paired with it.
fn prepare(
    desc: &TransformedDescriptor,
    lengths: impl ExactSizeIterator<Item = usize>,
) -> Result<Vec<SourcePlan>> {
    LayoutResolver::verify(desc)?;

    let arity = desc.arity();
    if lengths.len() != arity {
        return Err(StickifyError::InvalidBuffer(format!(
            "{} tensor takes {arity} buffer(s), got {}",
            desc.layout(),
            lengths.len()
        )));
    }

    let expected = desc.source().size_bytes()?;
    for (index, len) in lengths.enumerate() {
        if len != expected {
            return Err(StickifyError::InvalidBuffer(format!(
                "buffer {index} holds {len} bytes, expected {expected}"
            )));
        }
    }

    Ok(source_plans(desc))
}

fn check_element_size<T>(desc: &TransformedDescriptor) -> Result<()> {
    let size = std::mem::size_of::<T>();
    if size != desc.element_type().size() {
        return Err(StickifyError::InvalidType(format!(
            "{}-byte values cannot carry {} elements",
            size,
            desc.element_type()
        )));
    }
    Ok(())
}

/// Copy every run of `plans` into `dst`, which starts at physical byte `base`.
///
/// Out-of-range runs are a conversion failure. Through [`Stickifier::stickify`]
/// they cannot occur: every offset of a verified descriptor lies below its
/// checked `size_bytes`, which is exactly the allocated buffer size.
fn write_runs(
    plans: &[SourcePlan],
    sources: &[&[u8]],
    addressing: &StickAddressing,
    outer: Option<usize>,
    base: usize,
    dst: &mut [u8],
) -> Result<()> {
    for (plan, source) in plans.iter().zip(sources) {
        plan.for_each_run(addressing, outer, base, |run| {
            let from = source
                .get(run.src..run.src + run.len)
                .ok_or_else(|| out_of_range(run))?;
            let to = dst
                .get_mut(run.dst..run.dst + run.len)
                .ok_or_else(|| out_of_range(run))?;
            to.copy_from_slice(from);
            Ok(())
        })?;
    }
    Ok(())
}

fn physical(src: &[u8], run: Run) -> Result<&[u8]> {
    src.get(run.dst..run.dst + run.len)
        .ok_or_else(|| out_of_range(run))
}

fn out_of_range(run: Run) -> StickifyError {
    StickifyError::ConversionFailure(format!(
        "run of {} bytes from {} to {} falls outside the buffers",
        run.len, run.src, run.dst
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ElementType, Layout, PreTransformedDescriptor};
    use crate::layout::{ConcatInfo, ConcatUsage, PrevLayer, RnnType};
    use crate::memory::BufferManager;
    use crate::status::StatusCode;

    fn allocate(layout: Layout, ty: ElementType, shape: &[usize]) -> PhysicalTensor {
        let pre = PreTransformedDescriptor::new(layout, ty, shape).unwrap();
        let desc = LayoutResolver::default().resolve(&pre).unwrap();
        BufferManager::default().allocate(&desc).unwrap()
    }

    fn values(count: usize) -> Vec<f32> {
        (0..count).map(|i| i as f32 + 1.0).collect()
    }

    #[test]
    fn test_short_destination_is_conversion_failure() {
        let tensor = allocate(Layout::D2, ElementType::Fp32, &[3, 5]);
        let desc = tensor.descriptor();
        let data = values(15);
        let source: &[u8] = bytemuck::cast_slice(&data[..]);
        let plans = prepare(desc, std::iter::once(source.len())).unwrap();
        let addressing = StickAddressing::new(desc);

        // room for two of the three rows
        let mut dst = vec![0u8; 2 * desc.geometry().stick_bytes];
        let err = write_runs(&plans, &[source], &addressing, None, 0, &mut dst).unwrap_err();
        assert_eq!(err.status(), StatusCode::ConversionFailure);
        assert!(err.invalidates_buffer());
    }

    #[test]
    fn test_stickify_2d_places_rows_on_sticks() {
        let mut tensor = allocate(Layout::D2, ElementType::Fp32, &[3, 5]);
        let data = values(15);
        Stickifier::default()
            .stickify_typed(&mut tensor, &[&data[..]])
            .unwrap();
        assert_eq!(tensor.state(), TensorState::Stickified);

        // each row of 5 FP32 values starts its own 128-byte stick
        let physical: &[f32] = bytemuck::cast_slice(tensor.as_bytes().unwrap());
        for row in 0..3 {
            assert_eq!(&physical[row * 32..row * 32 + 5], &data[row * 5..row * 5 + 5]);
            assert!(physical[row * 32 + 5..(row + 1) * 32].iter().all(|&v| v == 0.0));
        }
        assert!(physical[96..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_stickify_rejects_second_write() {
        let mut tensor = allocate(Layout::D1, ElementType::Fp32, &[4]);
        let data = values(4);
        let stickifier = Stickifier::sequential();
        stickifier.stickify_typed(&mut tensor, &[&data[..]]).unwrap();

        let err = stickifier.stickify_typed(&mut tensor, &[&data[..]]).unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidState);
        assert_eq!(tensor.state(), TensorState::Stickified);
    }

    #[test]
    fn test_stickify_rejects_wrong_size_and_type() {
        let mut tensor = allocate(Layout::D2, ElementType::Fp16, &[2, 3]);
        let short = [0u8; 10];
        let err = Stickifier::default()
            .stickify(&mut tensor, &[&short[..]])
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidBuffer);

        let wide = [0f32; 6];
        let err = Stickifier::default()
            .stickify_typed(&mut tensor, &[&wide[..]])
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidType);
        assert_eq!(tensor.state(), TensorState::Allocated);
    }

    #[test]
    fn test_unstickify_requires_stickified() {
        let tensor = allocate(Layout::D1, ElementType::Fp32, &[4]);
        let mut out = [0f32; 4];
        let err = Stickifier::default()
            .unstickify_typed(&tensor, &mut [&mut out[..]])
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidState);
    }

    #[test]
    fn test_reset_allows_second_stickify() {
        let manager = BufferManager::default();
        let mut tensor = allocate(Layout::D2, ElementType::Fp32, &[2, 2]);
        let stickifier = Stickifier::default();
        stickifier.stickify_typed(&mut tensor, &[&[1.0f32, 2.0, 3.0, 4.0][..]]).unwrap();

        manager.reset(&mut tensor).unwrap();
        stickifier.stickify_typed(&mut tensor, &[&[5.0f32, 6.0, 7.0, 8.0][..]]).unwrap();

        let mut out = [0f32; 4];
        stickifier.unstickify_typed(&tensor, &mut [&mut out[..]]).unwrap();
        assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_tampered_descriptor_is_invalid_layout() {
        let tensor = allocate(Layout::D2, ElementType::Fp32, &[3, 5]);
        let json = tensor
            .descriptor()
            .to_json()
            .unwrap()
            .replace("\"dims\":[1,1,3,5]", "\"dims\":[1,1,3,6]");
        let tampered = TransformedDescriptor::from_json(&json).unwrap();
        assert_eq!(tampered.dims(), [1, 1, 3, 6]);

        let mut tensor = BufferManager::default().allocate(&tampered).unwrap();
        let data = values(15);
        let err = Stickifier::default()
            .stickify_typed(&mut tensor, &[&data[..]])
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidLayout);
        assert_eq!(tensor.state(), TensorState::Allocated);
    }

    #[test]
    fn test_gru_biases_land_in_gate_segments() {
        let pre = PreTransformedDescriptor::new(Layout::D2s, ElementType::Fp32, &[1, 3]).unwrap();
        let info = ConcatInfo::new(RnnType::Gru, ConcatUsage::Biases, PrevLayer::None);
        let desc = LayoutResolver::default()
            .resolve_concatenated(&pre, info)
            .unwrap();
        let mut tensor = BufferManager::default().allocate(&desc).unwrap();

        let z = [1.0f32, 2.0, 3.0];
        let r = [4.0f32, 5.0, 6.0];
        let h = [7.0f32, 8.0, 9.0];
        Stickifier::default()
            .stickify_typed(&mut tensor, &[&z[..], &r[..], &h[..]])
            .unwrap();

        let physical: &[f32] = bytemuck::cast_slice(tensor.as_bytes().unwrap());
        for (segment, gate) in desc.concat_segments().unwrap().iter().zip([z, r, h]) {
            let start = segment.byte_offset / 4;
            assert_eq!(&physical[start..start + 3], &gate);
        }
    }
}
