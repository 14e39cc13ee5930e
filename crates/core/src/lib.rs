// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mirage-core: data model for the mirage deception shell
//!
//! Everything in this crate is pure: no network, no storage, no tasks.

pub mod classify;
pub mod clock;
pub mod command;
pub mod facts;
pub mod filesystem;
pub mod id;
pub mod policy;
pub mod session;

pub use classify::{is_installed, parse_command, Classifier, ParsedCommand, READ_VERBS};
pub use clock::{Clock, SystemClock};
pub use command::{Category, Classification, CommandRecord, ResolutionPath, SensitivityTier};
pub use facts::{CommittedFacts, FactKey};
pub use filesystem::{
    normalize_path, Access, FilesystemModel, FsError, FsNode, NodeKind, NodeMetadata, Skeleton,
};
pub use id::{IdGen, UuidIdGen};
pub use policy::{
    render_template, CanonicalShape, Persona, PolicyEntry, PolicyError, SensitivityPolicy,
};
pub use session::{CloseReason, Session, SessionId, SessionStatus};

#[cfg(any(test, feature = "test-support"))]
pub use clock::FakeClock;
#[cfg(any(test, feature = "test-support"))]
pub use id::SequentialIdGen;
