// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Status reporting shared by every public operation.
//!
//! Operations return [`Result<T>`]; the error side carries a message for
//! diagnostics and maps onto exactly one [`StatusCode`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use thiserror::Error;

/// Result type for stickification operations.
pub type Result<T> = std::result::Result<T, StickifyError>;

/// Errors that can occur while describing, resolving, allocating or converting tensors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StickifyError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conversion failure: {0}")]
    ConversionFailure(String),
}

impl StickifyError {
    /// The status code reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            StickifyError::InvalidFormat(_) => StatusCode::InvalidFormat,
            StickifyError::InvalidLayout(_) => StatusCode::InvalidLayout,
            StickifyError::InvalidType(_) => StatusCode::InvalidType,
            StickifyError::InvalidBuffer(_) => StatusCode::InvalidBuffer,
            StickifyError::InvalidState(_) => StatusCode::InvalidState,
            StickifyError::ConversionFailure(_) => StatusCode::ConversionFailure,
        }
    }

    /// Whether the target buffer must be discarded after this error.
    ///
    /// Only a conversion failure leaves a physical buffer in an unspecified state.
    pub fn invalidates_buffer(&self) -> bool {
        matches!(self, StickifyError::ConversionFailure(_))
    }
}

/// Uniform result codes surfaced by every operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    Ok,
    InvalidFormat,
    InvalidLayout,
    InvalidType,
    InvalidBuffer,
    InvalidState,
    ConversionFailure,
}

impl StatusCode {
    /// Collapse a result into its status code.
    pub fn of<T>(result: &Result<T>) -> StatusCode {
        match result {
            Ok(_) => StatusCode::Ok,
            Err(e) => e.status(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl From<&StickifyError> for StatusCode {
    fn from(err: &StickifyError) -> Self {
        err.status()
    }
}
