// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Accelerator registry.
//!
//! A process-wide, statically known set of accelerator backends. The registry
//! is initialised once from [`AcceleratorSettings`]; afterwards each active
//! backend is asked to append its passes to a [`PassPipeline`] before any
//! module is run through it.

use std::fmt;
use std::sync::OnceLock;

use anyhow::{Result, anyhow, bail};
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nnpa_stickify::StickifyConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub mod nnpa;
pub mod pipeline;

pub use nnpa::{ConstantStickifyPass, NnpaAccelerator};
pub use pipeline::{ConstantTensor, EmissionTarget, Module, Pass, PassPipeline};

/// Path of an optional TOML settings file.
pub const SETTINGS_PATH_ENV: &str = "NNPA_ACCEL_CONFIG_PATH";

const ENV_PREFIX: &str = "NNPA_ACCEL_";

static REGISTRY: OnceLock<AcceleratorRegistry> = OnceLock::new();

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    Nnpa,
}

/// A backend that contributes passes to the compilation pipeline.
pub trait Accelerator: Send + Sync + fmt::Debug {
    fn kind(&self) -> AcceleratorKind;

    /// Whether this backend takes part in the current compilation.
    fn is_active(&self) -> bool;

    /// Append this backend's passes to `pipeline`.
    fn prepare(&self, pipeline: &mut PassPipeline, target: EmissionTarget) -> Result<()>;
}

/// Which accelerators are enabled, and how they convert tensors.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AcceleratorSettings {
    /// Enabled backends
    #[builder(default)]
    pub accelerators: Vec<AcceleratorKind>,

    /// Layout and buffer settings for NNPA
    #[builder(default)]
    pub stickify: StickifyConfig,
}

impl AcceleratorSettings {
    pub fn builder() -> AcceleratorSettingsBuilder {
        AcceleratorSettingsBuilder::default()
    }

    /// Defaults, then the optional TOML file, then `NNPA_ACCEL_*` variables.
    pub fn from_settings() -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    pub fn is_enabled(&self, kind: AcceleratorKind) -> bool {
        self.accelerators.contains(&kind)
    }
}

/// Every known backend, each marked active or not by the settings.
#[derive(Debug)]
pub struct AcceleratorRegistry {
    accelerators: Vec<Box<dyn Accelerator>>,
}

impl AcceleratorRegistry {
    pub fn new(settings: &AcceleratorSettings) -> Result<Self> {
        settings.stickify.check()?;

        let accelerators = AcceleratorKind::iter()
            .map(|kind| -> Box<dyn Accelerator> {
                match kind {
                    AcceleratorKind::Nnpa => Box::new(NnpaAccelerator::new(
                        settings.is_enabled(kind),
                        settings.stickify.clone(),
                    )),
                }
            })
            .collect();
        Ok(Self { accelerators })
    }

    pub fn accelerators(&self) -> &[Box<dyn Accelerator>] {
        &self.accelerators
    }

    pub fn active(&self) -> impl Iterator<Item = &dyn Accelerator> {
        self.accelerators
            .iter()
            .map(|a| a.as_ref())
            .filter(|a| a.is_active())
    }

    /// Let every active backend append its passes, in registry order.
    pub fn prepare(&self, pipeline: &mut PassPipeline, target: EmissionTarget) -> Result<()> {
        for accelerator in self.active() {
            tracing::debug!(kind = %accelerator.kind(), %target, "preparing accelerator");
            accelerator.prepare(pipeline, target)?;
        }
        pipeline.set_target(target);
        Ok(())
    }
}

/// Initialise the process-wide registry. Fails if it is already initialised.
pub fn init_accelerators(settings: &AcceleratorSettings) -> Result<&'static AcceleratorRegistry> {
    nnpa_stickify::logging::init();
    let registry = AcceleratorRegistry::new(settings)?;
    if REGISTRY.set(registry).is_err() {
        bail!("accelerator registry is already initialised");
    }
    tracing::info!(enabled = ?settings.accelerators, "accelerator registry initialised");
    accelerators()
}

/// The process-wide registry.
pub fn accelerators() -> Result<&'static AcceleratorRegistry> {
    REGISTRY
        .get()
        .ok_or_else(|| anyhow!("accelerator registry has not been initialised"))
}

/// Prepare `pipeline` with every active accelerator of the process-wide registry.
pub fn prepare_pipeline(pipeline: &mut PassPipeline, target: EmissionTarget) -> Result<()> {
    accelerators()?.prepare(pipeline, target)
}
