// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A minimal pass pipeline over a module of constant tensors.

use std::fmt;

use anyhow::{Context, Result, bail};
use nnpa_stickify::{ConcatInfo, PhysicalTensor, PreTransformedDescriptor};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What the compilation is asked to emit.
///
/// Variants are ordered from least to most lowered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum EmissionTarget {
    OnnxBasic,
    OnnxIr,
    Mlir,
    LlvmIr,
    Object,
    Library,
}

impl EmissionTarget {
    /// Whether the output is lowered far enough for accelerator layouts to apply.
    pub fn lowers_past_onnx(&self) -> bool {
        *self >= EmissionTarget::Mlir
    }
}

/// A constant tensor of a [`Module`], held in logical row-major form until a
/// pass converts it.
#[derive(Debug)]
pub struct ConstantTensor {
    pub name: String,
    pub descriptor: PreTransformedDescriptor,
    /// Gate concatenation, when `data` holds one buffer per gate
    pub concat: Option<ConcatInfo>,
    pub data: Vec<Vec<u8>>,
    pub stickified: Option<PhysicalTensor>,
}

impl ConstantTensor {
    pub fn new(name: impl Into<String>, descriptor: PreTransformedDescriptor, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            descriptor,
            concat: None,
            data: vec![data],
            stickified: None,
        }
    }

    /// One logical buffer per gate, in gate order.
    pub fn gates(
        name: impl Into<String>,
        descriptor: PreTransformedDescriptor,
        concat: ConcatInfo,
        gates: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            concat: Some(concat),
            data: gates,
            stickified: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    pub constants: Vec<ConstantTensor>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: Vec::new(),
        }
    }

    pub fn add_constant(&mut self, constant: ConstantTensor) -> &mut Self {
        self.constants.push(constant);
        self
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantTensor> {
        self.constants.iter().find(|c| c.name == name)
    }
}

/// A transformation applied to a [`Module`].
pub trait Pass: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn run(&self, module: &mut Module) -> Result<()>;
}

/// Ordered passes, prepared by the active accelerators for one emission target.
#[derive(Debug, Default)]
pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
    target: Option<EmissionTarget>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// The emission target the pipeline was prepared for, if any.
    pub fn target(&self) -> Option<EmissionTarget> {
        self.target
    }

    pub(crate) fn set_target(&mut self, target: EmissionTarget) {
        self.target = Some(target);
    }

    /// Run every pass in order. The pipeline must have been prepared first.
    pub fn run(&self, module: &mut Module) -> Result<()> {
        let Some(target) = self.target else {
            bail!("pass pipeline has not been prepared by the accelerator registry");
        };
        let span = tracing::info_span!("pipeline", module = %module.name, %target);
        let _guard = span.enter();

        for pass in &self.passes {
            tracing::debug!(pass = pass.name(), "running pass");
            pass.run(module)
                .with_context(|| format!("pass {} failed on module {}", pass.name(), module.name))?;
        }
        Ok(())
    }
}
