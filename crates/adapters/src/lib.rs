// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for the deception shell's external collaborators

mod env;
pub mod generator;
pub mod sink;
pub mod traced;

pub use generator::{
    Exchange, GeminiGenerator, GenerationRequest, GeneratorAdapter, GeneratorError,
    NoOpGenerator, DEFAULT_GEMINI_MODEL,
};
pub use sink::{ForensicSink, NoOpForensicSink, SessionInfo, SessionSummary, SinkError};
pub use traced::TracedGenerator;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use generator::{ScriptedGenerator, ScriptedReply};
#[cfg(any(test, feature = "test-support"))]
pub use sink::{FakeForensicSink, SinkCall};
