// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Hardware geometry and engine settings.
//!
//! Settings are layered with figment:
//!   1. Built-in defaults matching the NNPA stick format.
//!   2. Optional TOML file named by `NNPA_STICKIFY_CONFIG_PATH`.
//!   3. `NNPA_STICKIFY_*` environment variables (highest priority). Nested keys
//!      use a double underscore, e.g. `NNPA_STICKIFY_GEOMETRY__STICK_BYTES=64`.

use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::status::{Result, StickifyError};

/// Environment variable holding an optional TOML settings file.
pub const CONFIG_PATH_ENV: &str = "NNPA_STICKIFY_CONFIG_PATH";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "NNPA_STICKIFY_";

/// Bytes in one stick: 64 two-byte elements.
pub const DEFAULT_STICK_BYTES: usize = 128;

/// Sticks in one 4 KiB page.
pub const DEFAULT_STICKS_PER_PAGE: usize = 32;

/// Largest physical dimension the accelerator can index.
pub const DEFAULT_MAX_DIM_SIZE: usize = 32768;

/// Physical buffers start on a page boundary.
pub const DEFAULT_BUFFER_ALIGNMENT: usize = 4096;

/// Below this many bytes the copy runs on the calling thread.
pub const DEFAULT_PARALLEL_MIN_BYTES: usize = 1 << 20;

/// Interleaving geometry of the physical layout.
///
/// The stick is the minimum addressable granule; a page groups a fixed number
/// of sticks along the second-innermost physical dimension.
#[derive(Debug, Clone, Copy, Builder, Validate, Serialize, Deserialize, PartialEq, Eq)]
#[validate(schema(function = "validate_page_size"))]
#[serde(default)]
pub struct StickGeometry {
    /// Size of one stick in bytes
    #[validate(custom(function = "validate_power_of_2"))]
    #[builder(default = "DEFAULT_STICK_BYTES")]
    pub stick_bytes: usize,

    /// Number of sticks per page
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_STICKS_PER_PAGE")]
    pub sticks_per_page: usize,

    /// Maximum size of any physical dimension
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_MAX_DIM_SIZE")]
    pub max_dim_size: usize,
}

impl StickGeometry {
    pub fn builder() -> StickGeometryBuilder {
        StickGeometryBuilder::default()
    }

    /// Bytes in one page, or `None` if the page size is not representable.
    pub fn page_bytes(&self) -> Option<usize> {
        self.stick_bytes.checked_mul(self.sticks_per_page)
    }

    /// Number of elements of `element_size` bytes carried by one stick.
    ///
    /// Returns `None` when the element size does not evenly divide the stick.
    pub fn elements_per_stick(&self, element_size: usize) -> Option<usize> {
        if element_size == 0 || element_size > self.stick_bytes {
            return None;
        }
        if self.stick_bytes % element_size != 0 {
            return None;
        }
        Some(self.stick_bytes / element_size)
    }
}

impl Default for StickGeometry {
    fn default() -> Self {
        Self {
            stick_bytes: DEFAULT_STICK_BYTES,
            sticks_per_page: DEFAULT_STICKS_PER_PAGE,
            max_dim_size: DEFAULT_MAX_DIM_SIZE,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Builder, Validate, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StickifyConfig {
    /// Physical layout geometry
    #[validate(nested)]
    #[builder(default)]
    pub geometry: StickGeometry,

    /// Alignment of physical buffers in bytes
    #[validate(custom(function = "validate_power_of_2"))]
    #[builder(default = "DEFAULT_BUFFER_ALIGNMENT")]
    pub buffer_alignment: usize,

    /// Copy independent outer slabs on the rayon pool
    #[builder(default = "true")]
    pub parallel: bool,

    /// Minimum physical size before the copy is parallelised
    #[builder(default = "DEFAULT_PARALLEL_MIN_BYTES")]
    pub parallel_min_bytes: usize,
}

impl Default for StickifyConfig {
    fn default() -> Self {
        Self {
            geometry: StickGeometry::default(),
            buffer_alignment: DEFAULT_BUFFER_ALIGNMENT,
            parallel: true,
            parallel_min_bytes: DEFAULT_PARALLEL_MIN_BYTES,
        }
    }
}

impl StickifyConfig {
    pub fn builder() -> StickifyConfigBuilder {
        StickifyConfigBuilder::default()
    }

    /// Read the configuration from defaults, the optional TOML file and the environment.
    pub fn from_settings() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered figment used by [`StickifyConfig::from_settings`].
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| StickifyError::InvalidFormat(format!("configuration: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Validate a configuration built in code.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| StickifyError::InvalidFormat(format!("configuration: {e}")))
    }
}

pub fn validate_power_of_2(value: usize) -> std::result::Result<(), ValidationError> {
    if !value.is_power_of_two() {
        return Err(ValidationError::new("value_must_be_power_of_2"));
    }
    Ok(())
}

fn validate_page_size(geometry: &StickGeometry) -> std::result::Result<(), ValidationError> {
    if geometry.page_bytes().is_none() {
        return Err(ValidationError::new("page_size_overflows"));
    }
    Ok(())
}
