// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mirage-engine: response consistency engine and session state machine

mod consistency;
mod error;
mod listing;
mod local;
mod prompt;
mod session;
mod validate;

pub use consistency::{ConsistencyEngine, EngineConfig, Resolution, ResolveRequest};
pub use error::SessionError;
pub use local::{LocalResolution, LocalShell};
pub use prompt::{build_request, PromptInput, PromptStrategy};
pub use session::{SessionConfig, SessionContext, SessionOutcome};
pub use validate::{repair, Validated, ValidationContext, ValidationFailure, Validator};
