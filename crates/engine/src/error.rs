// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for session transport

use thiserror::Error;

/// Failures that end a session. Generator and storage failures never
/// surface here: the engine absorbs the former and the sink logs the latter.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
