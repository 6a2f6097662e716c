// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Forward mapping from logical element coordinates to physical byte offsets.
//!
//! A logical coordinate `[x0, x1, x2, x3]` (shape left-padded to four dims) is
//! first moved to a physical coordinate `[p0, p1, p2, p3]` by an [`AxisMap`],
//! then turned into a byte offset by [`StickAddressing`]. Both steps use
//! checked arithmetic; `None` means the offset cannot be represented.

use crate::descriptor::{DataFormat, Layout, TransformedDescriptor};
use crate::status::{Result, StickifyError};

/// Round `value` up to a multiple of `granule`.
#[inline]
pub(crate) fn pad_to(value: usize, granule: usize) -> Option<usize> {
    debug_assert!(granule > 0);
    value.checked_add(granule - 1).map(|v| v / granule * granule)
}

/// Number of `granule`-sized units needed to hold `value`.
#[inline]
pub(crate) fn units(value: usize, granule: usize) -> usize {
    debug_assert!(granule > 0);
    value.div_ceil(granule)
}

/// How a logical source coordinate lands in the physical coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AxisMap {
    /// `[a, b, c, d] -> [a, b, c, d]`
    Identity,
    /// 2DS: `[_, _, a, b] -> [a, 0, 0, b]`
    Stacked2,
    /// 3DS: `[_, a, b, c] -> [a, 0, b, c]`
    Stacked3,
    /// NCHW: `[n, c, h, w] -> [n, h, w, c]`
    Transposed,
    /// 4DS: `[t, d, b, h] -> [t, 0, b, d * padded_hidden + h]`
    Directional { padded_hidden: usize },
    /// One gate of a concatenated tensor, shifted by `base` along the innermost axis.
    Gate {
        stacked3: bool,
        base: usize,
        /// `(half, padded_half)` when the rows come from a bidirectional layer
        bidir_rows: Option<(usize, usize)>,
    },
}

impl AxisMap {
    pub(crate) fn physical(&self, x: [usize; 4]) -> Option<[usize; 4]> {
        let p = match *self {
            AxisMap::Identity => x,
            AxisMap::Stacked2 => [x[2], 0, 0, x[3]],
            AxisMap::Stacked3 => [x[1], 0, x[2], x[3]],
            AxisMap::Transposed => [x[0], x[2], x[3], x[1]],
            AxisMap::Directional { padded_hidden } => [
                x[0],
                0,
                x[2],
                x[1].checked_mul(padded_hidden)?.checked_add(x[3])?,
            ],
            AxisMap::Gate {
                stacked3,
                base,
                bidir_rows,
            } => {
                let c = base.checked_add(x[3])?;
                if stacked3 {
                    let row = match bidir_rows {
                        Some((half, padded_half)) if x[2] >= half => {
                            padded_half.checked_add(x[2] - half)?
                        }
                        _ => x[2],
                    };
                    [x[1], 0, row, c]
                } else {
                    [x[2], 0, 0, c]
                }
            }
        };
        Some(p)
    }

    /// Logical axis that lands on the outermost physical axis.
    pub(crate) fn outer_axis(&self) -> usize {
        match *self {
            AxisMap::Stacked2 => 2,
            AxisMap::Stacked3 => 1,
            AxisMap::Gate { stacked3: true, .. } => 1,
            AxisMap::Gate { stacked3: false, .. } => 2,
            _ => 0,
        }
    }

    /// Whether consecutive innermost logical elements stay consecutive physically.
    pub(crate) fn contiguous_inner(&self) -> bool {
        !matches!(self, AxisMap::Transposed)
    }
}

/// Byte addressing of the stick-interleaved physical tensor.
///
/// Feature format `[N, H, W, C]`:
/// `stick = ((n * C_sticks + c / E) * H + h) * W_pages * P + w`
///
/// Kernel format `[H, W, C, K]`:
/// `stick = (((k / E) * H + h) * W + w) * C_pages * P + c`
///
/// and in both cases `offset = stick * stick_bytes + (inner % E) * element_size`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StickAddressing {
    format: DataFormat,
    dims: [usize; 4],
    elements_per_stick: usize,
    element_size: usize,
    stick_bytes: usize,
    /// Sticks spanned by the paged axis (W for feature, C for kernel)
    paged_sticks: usize,
    /// Stick groups along the innermost axis
    stick_groups: usize,
}

impl StickAddressing {
    pub(crate) fn new(desc: &TransformedDescriptor) -> Self {
        let geometry = desc.geometry();
        let dims = desc.dims();
        let elements_per_stick = desc.elements_per_stick();
        // W for feature, C for kernel; both sit at dims[2]
        let paged_axis = dims[2];
        Self {
            format: desc.format(),
            dims,
            elements_per_stick,
            element_size: desc.element_type().size(),
            stick_bytes: geometry.stick_bytes,
            paged_sticks: units(paged_axis, geometry.sticks_per_page) * geometry.sticks_per_page,
            stick_groups: units(dims[3], elements_per_stick),
        }
    }

    pub(crate) fn elements_per_stick(&self) -> usize {
        self.elements_per_stick
    }

    /// Byte offset of physical coordinate `p`.
    pub(crate) fn offset(&self, p: [usize; 4]) -> Option<usize> {
        let group = p[3] / self.elements_per_stick;
        let lane = p[3] % self.elements_per_stick;
        let stick = match self.format {
            DataFormat::Feature => p[0]
                .checked_mul(self.stick_groups)?
                .checked_add(group)?
                .checked_mul(self.dims[1])?
                .checked_add(p[1])?
                .checked_mul(self.paged_sticks)?
                .checked_add(p[2])?,
            DataFormat::Kernel => group
                .checked_mul(self.dims[0])?
                .checked_add(p[0])?
                .checked_mul(self.dims[1])?
                .checked_add(p[1])?
                .checked_mul(self.paged_sticks)?
                .checked_add(p[2])?,
        };
        stick
            .checked_mul(self.stick_bytes)?
            .checked_add(lane.checked_mul(self.element_size)?)
    }

    /// Bytes covered by one outermost index, when the outermost physical axis
    /// partitions the buffer into contiguous slabs.
    pub(crate) fn slab_bytes(&self) -> Option<usize> {
        match self.format {
            DataFormat::Feature => self
                .stick_groups
                .checked_mul(self.dims[1])?
                .checked_mul(self.paged_sticks)?
                .checked_mul(self.stick_bytes),
            DataFormat::Kernel => None,
        }
    }
}

/// Copy plan for a single logical source tensor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourcePlan {
    map: AxisMap,
    dims: [usize; 4],
    element_size: usize,
}

/// A contiguous run shared by a logical source and the physical buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub src: usize,
    pub dst: usize,
    pub len: usize,
}

impl SourcePlan {
    /// Visit every contiguous run of this source in row-major logical order.
    ///
    /// With `outer = Some(n)` only elements landing in outer slab `n` are
    /// visited and `dst` is relative to `base`.
    pub(crate) fn for_each_run<F>(
        &self,
        addressing: &StickAddressing,
        outer: Option<usize>,
        base: usize,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(Run) -> Result<()>,
    {
        let d = self.dims;
        let es = self.element_size;
        let e = addressing.elements_per_stick();
        let mut ranges = [0..d[0], 0..d[1], 0..d[2]];
        if let Some(n) = outer {
            let axis = self.map.outer_axis();
            ranges[axis] = n..n + 1;
        }

        for x0 in ranges[0].clone() {
            for x1 in ranges[1].clone() {
                for x2 in ranges[2].clone() {
                    let row = ((x0 * d[1] + x1) * d[2] + x2) * d[3];
                    let mut x3 = 0;
                    while x3 < d[3] {
                        let p = self
                            .map
                            .physical([x0, x1, x2, x3])
                            .ok_or_else(|| overflow(x0, x1, x2, x3))?;
                        let dst = addressing
                            .offset(p)
                            .and_then(|off| off.checked_sub(base))
                            .ok_or_else(|| overflow(x0, x1, x2, x3))?;
                        let count = if self.map.contiguous_inner() {
                            (e - p[3] % e).min(d[3] - x3)
                        } else {
                            1
                        };
                        f(Run {
                            src: (row + x3) * es,
                            dst,
                            len: count * es,
                        })?;
                        x3 += count;
                    }
                }
            }
        }
        Ok(())
    }
}

fn overflow(x0: usize, x1: usize, x2: usize, x3: usize) -> StickifyError {
    StickifyError::ConversionFailure(format!(
        "physical offset of element [{x0}, {x1}, {x2}, {x3}] is not representable"
    ))
}

/// One plan per logical source, in gate order for concatenated tensors.
pub(crate) fn source_plans(desc: &TransformedDescriptor) -> Vec<SourcePlan> {
    let source = desc.source();
    let dims = source.dims4();
    let element_size = desc.element_type().size();
    let e = desc.elements_per_stick();

    let plan = |map| SourcePlan {
        map,
        dims,
        element_size,
    };

    if let Some(info) = desc.concat() {
        let hidden = dims[3];
        // widths were validated by the resolver, which produced this descriptor
        let padded_hidden = units(hidden, e) * e;
        let stacked3 = source.layout() == Layout::D3s;
        let bidir_rows = if info.is_bidir_weights() {
            let half = dims[2] / 2;
            Some((half, units(half, e) * e))
        } else {
            None
        };
        return (0..info.rnn_type().gate_count())
            .map(|g| {
                plan(AxisMap::Gate {
                    stacked3,
                    base: g * padded_hidden,
                    bidir_rows,
                })
            })
            .collect();
    }

    let map = match source.layout() {
        Layout::D2s => AxisMap::Stacked2,
        Layout::D3s => AxisMap::Stacked3,
        Layout::Nchw => AxisMap::Transposed,
        Layout::D4s => AxisMap::Directional {
            padded_hidden: units(dims[3], e) * e,
        },
        _ => AxisMap::Identity,
    };
    vec![plan(map)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_to() {
        assert_eq!(pad_to(5, 16), Some(16));
        assert_eq!(pad_to(16, 16), Some(16));
        assert_eq!(pad_to(17, 16), Some(32));
        assert_eq!(pad_to(usize::MAX, 16), None);
        assert_eq!(units(33, 32), 2);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_pad_to_zero_granule() {
        let _ = pad_to(5, 0);
    }

    #[test]
    fn test_axis_maps() {
        assert_eq!(AxisMap::Stacked2.physical([0, 0, 3, 4]), Some([3, 0, 0, 4]));
        assert_eq!(AxisMap::Stacked3.physical([0, 2, 3, 4]), Some([2, 0, 3, 4]));
        assert_eq!(AxisMap::Transposed.physical([1, 2, 3, 4]), Some([1, 3, 4, 2]));
        assert_eq!(
            AxisMap::Directional { padded_hidden: 64 }.physical([5, 1, 2, 3]),
            Some([5, 0, 2, 67])
        );

        let gate = AxisMap::Gate {
            stacked3: true,
            base: 128,
            bidir_rows: Some((3, 64)),
        };
        assert_eq!(gate.physical([0, 1, 2, 5]), Some([1, 0, 2, 133]));
        assert_eq!(gate.physical([0, 1, 4, 5]), Some([1, 0, 65, 133]));
        assert_eq!(gate.outer_axis(), 1);
        assert!(!AxisMap::Transposed.contiguous_inner());
    }
}
