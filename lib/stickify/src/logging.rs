// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide tracing setup.
//!
//! Filters come from the `NNPA_LOG` environment variable using the usual
//! `EnvFilter` directive syntax (`nnpa_stickify=trace,info`). The default level
//! is `info`. Setting `NNPA_LOGGING_JSONL=1` switches to one JSON object per line.

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Environment variable carrying filter directives.
pub const NNPA_LOG: &str = "NNPA_LOG";

/// Environment variable enabling JSONL output.
pub const NNPA_LOGGING_JSONL: &str = "NNPA_LOGGING_JSONL";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if let Err(e) = setup_logging() {
            eprintln!("Failed to initialize logging: {}", e);
        }
    });
}

fn filters() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(NNPA_LOG)
        .from_env_lossy()
}

fn jsonl_logging_enabled() -> bool {
    std::env::var(NNPA_LOGGING_JSONL)
        .map(|val| matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

fn setup_logging() -> Result<(), Box<dyn std::error::Error>> {
    if jsonl_logging_enabled() {
        let l = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_filter(filters());
        tracing_subscriber::registry().with(l).try_init()?;
    } else {
        let l = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filters());
        tracing_subscriber::registry().with(l).try_init()?;
    }
    Ok(())
}
