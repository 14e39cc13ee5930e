// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forensic sink adapters

mod noop;

pub use noop::NoOpForensicSink;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeForensicSink, SinkCall};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirage_core::{CloseReason, CommandRecord, SessionId};
use thiserror::Error;

/// Errors from forensic sinks. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Identity of the session a record belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub peer_address: String,
    pub started_at: DateTime<Utc>,
}

/// Final state of a session, reported once on close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub ended_at: DateTime<Utc>,
    pub reason: CloseReason,
    pub command_count: usize,
    pub final_cwd: String,
}

/// Destination for the audit trail.
///
/// `session_started` and `record` only enqueue and must not block the reply
/// path. `session_ended` waits until everything queued for the session has
/// been handed to storage.
#[async_trait]
pub trait ForensicSink: Clone + Send + Sync + 'static {
    fn session_started(&self, session: &SessionInfo) -> Result<(), SinkError>;

    fn record(&self, session: &SessionInfo, record: &CommandRecord) -> Result<(), SinkError>;

    async fn session_ended(
        &self,
        session: &SessionInfo,
        summary: &SessionSummary,
    ) -> Result<(), SinkError>;
}
