// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NNPA backend.

use anyhow::{Context, Result};
use nnpa_stickify::{BufferManager, LayoutResolver, Stickifier, StickifyConfig};

use crate::pipeline::{ConstantTensor, EmissionTarget, Module, Pass, PassPipeline};
use crate::{Accelerator, AcceleratorKind};

#[derive(Debug, Clone)]
pub struct NnpaAccelerator {
    active: bool,
    config: StickifyConfig,
}

impl NnpaAccelerator {
    pub fn new(active: bool, config: StickifyConfig) -> Self {
        Self { active, config }
    }
}

impl Accelerator for NnpaAccelerator {
    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Nnpa
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn prepare(&self, pipeline: &mut PassPipeline, target: EmissionTarget) -> Result<()> {
        if !target.lowers_past_onnx() {
            tracing::debug!(%target, "no NNPA passes for this emission target");
            return Ok(());
        }
        let pass = ConstantStickifyPass::new(&self.config)?;
        pipeline.add_pass(Box::new(pass));
        Ok(())
    }
}

/// Converts every constant of a module into its stickified physical form.
#[derive(Debug, Clone, Copy)]
pub struct ConstantStickifyPass {
    resolver: LayoutResolver,
    buffers: BufferManager,
    stickifier: Stickifier,
}

impl ConstantStickifyPass {
    pub fn new(config: &StickifyConfig) -> Result<Self> {
        Ok(Self {
            resolver: LayoutResolver::from_config(config)?,
            buffers: BufferManager::from_config(config)?,
            stickifier: Stickifier::from_config(config),
        })
    }

    fn convert(&self, constant: &ConstantTensor) -> Result<nnpa_stickify::PhysicalTensor> {
        let desc = match constant.concat {
            Some(info) => self
                .resolver
                .resolve_concatenated(&constant.descriptor, info)?,
            None => self.resolver.resolve(&constant.descriptor)?,
        };
        let mut tensor = self.buffers.allocate(&desc)?;
        let sources: Vec<&[u8]> = constant.data.iter().map(|d| d.as_slice()).collect();
        self.stickifier.stickify(&mut tensor, &sources)?;
        Ok(tensor)
    }
}

impl Pass for ConstantStickifyPass {
    fn name(&self) -> &'static str {
        "nnpa-constant-stickify"
    }

    fn run(&self, module: &mut Module) -> Result<()> {
        let mut converted = 0;
        for constant in module
            .constants
            .iter_mut()
            .filter(|c| c.stickified.is_none())
        {
            let tensor = self
                .convert(constant)
                .with_context(|| format!("stickifying constant {}", constant.name))?;
            tracing::trace!(
                name = %constant.name,
                layout = %tensor.descriptor().layout(),
                size = tensor.size_bytes(),
                "stickified constant"
            );
            constant.stickified = Some(tensor);
            converted += 1;
        }
        tracing::debug!(module = %module.name, converted, "constants stickified");
        Ok(())
    }
}
