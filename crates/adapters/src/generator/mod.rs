// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Text generator adapters

mod gemini;
mod noop;

pub use gemini::{GeminiGenerator, DEFAULT_GEMINI_MODEL};
pub use noop::NoOpGenerator;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ScriptedGenerator, ScriptedReply};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from generator calls.
///
/// Every variant is absorbed by the consistency engine and treated like a
/// failed validation; none of them is ever shown to a session peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("generator timed out")]
    Timeout,
    #[error("generator refused: {0}")]
    RefusalDetected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("generator unavailable")]
    Unavailable,
}

/// One earlier command and the output the peer saw for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// Everything a generator needs to produce one command's output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Standing instructions (persona, output rules)
    pub system: String,
    /// The request for this attempt
    pub prompt: String,
    /// Earlier exchanges in the session, oldest first
    pub context: Vec<Exchange>,
}

/// Adapter for producing synthetic command output
#[async_trait]
pub trait GeneratorAdapter: Clone + Send + Sync + 'static {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError>;
}
