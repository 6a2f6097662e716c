// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Gate concatenation for recurrent cells.
//!
//! LSTM weights and biases are supplied as four logical tensors (forget, input,
//! cell, output) and GRU ones as three (update, reset, hidden). They are fused
//! along the innermost physical dimension, each gate padded to a whole number
//! of sticks before the next one starts.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::descriptor::Layout;

/// Recurrent cell type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RnnType {
    Lstm,
    Gru,
}

impl RnnType {
    /// Gates in physical order.
    pub fn gates(&self) -> &'static [Gate] {
        match self {
            RnnType::Lstm => &[Gate::Forget, Gate::Input, Gate::Cell, Gate::Output],
            RnnType::Gru => &[Gate::Update, Gate::Reset, Gate::Hidden],
        }
    }

    pub fn gate_count(&self) -> usize {
        self.gates().len()
    }
}

/// A single gate tensor of a recurrent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Gate {
    Forget,
    Input,
    Cell,
    Output,
    Update,
    Reset,
    Hidden,
}

/// What the concatenated tensor feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConcatUsage {
    Weights,
    HiddenWeights,
    Biases,
    HiddenBiases,
}

impl ConcatUsage {
    /// Logical layout the gate tensors must carry.
    pub fn source_layout(&self) -> Layout {
        match self {
            ConcatUsage::Weights | ConcatUsage::HiddenWeights => Layout::D3s,
            ConcatUsage::Biases | ConcatUsage::HiddenBiases => Layout::D2s,
        }
    }
}

/// Direction of the layer that produces this layer's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PrevLayer {
    None,
    Uni,
    Bidir,
}

/// Which logical tensors are fused, in which order, and how.
///
/// The concatenation axis is always the innermost physical dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Getters)]
pub struct ConcatInfo {
    #[getter(copy)]
    rnn_type: RnnType,

    #[getter(copy)]
    usage: ConcatUsage,

    #[getter(copy)]
    prev_layer: PrevLayer,
}

impl ConcatInfo {
    pub fn new(rnn_type: RnnType, usage: ConcatUsage, prev_layer: PrevLayer) -> Self {
        Self {
            rnn_type,
            usage,
            prev_layer,
        }
    }

    pub fn gates(&self) -> &'static [Gate] {
        self.rnn_type.gates()
    }

    /// Input weights following a bidirectional layer split their rows in two halves.
    pub fn is_bidir_weights(&self) -> bool {
        self.usage == ConcatUsage::Weights && self.prev_layer == PrevLayer::Bidir
    }

    /// Physical layout tag of the fused tensor.
    pub fn physical_layout(&self) -> Layout {
        match (self.rnn_type, self.is_bidir_weights()) {
            (RnnType::Lstm, false) => Layout::Fico,
            (RnnType::Lstm, true) => Layout::BidirFico,
            (RnnType::Gru, false) => Layout::Zrh,
            (RnnType::Gru, true) => Layout::BidirZrh,
        }
    }
}

/// Placement of one gate inside a concatenated tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatSegment {
    pub gate: Gate,

    /// Position of the gate in the declared order
    pub index: usize,

    /// First physical element along the concatenation axis
    pub first_element: usize,

    /// Padded width of the gate along the concatenation axis
    pub padded_width: usize,

    /// Byte offset of the gate's first stick
    pub byte_offset: usize,
}
