// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake forensic sink for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{ForensicSink, SessionInfo, SessionSummary, SinkError};
use async_trait::async_trait;
use mirage_core::{CommandRecord, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Recorded sink call
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Started(SessionInfo),
    Command {
        session_id: SessionId,
        record: CommandRecord,
    },
    Ended {
        session_id: SessionId,
        summary: SessionSummary,
    },
}

#[derive(Default)]
struct FakeSinkState {
    calls: Vec<SinkCall>,
    unavailable: bool,
}

/// Fake forensic sink for testing
#[derive(Clone, Default)]
pub struct FakeForensicSink {
    inner: Arc<Mutex<FakeSinkState>>,
}

impl FakeForensicSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every call fails and nothing is recorded
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<SinkCall> {
        self.inner.lock().calls.clone()
    }

    /// Recorded command records, in order
    pub fn records(&self) -> Vec<CommandRecord> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Command { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Option<SessionSummary> {
        self.inner.lock().calls.iter().find_map(|call| match call {
            SinkCall::Ended { summary, .. } => Some(summary.clone()),
            _ => None,
        })
    }

    fn push(&self, call: SinkCall) -> Result<(), SinkError> {
        let mut state = self.inner.lock();
        if state.unavailable {
            return Err(SinkError::StorageUnavailable("fake sink offline".to_string()));
        }
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl ForensicSink for FakeForensicSink {
    fn session_started(&self, session: &SessionInfo) -> Result<(), SinkError> {
        self.push(SinkCall::Started(session.clone()))
    }

    fn record(&self, session: &SessionInfo, record: &CommandRecord) -> Result<(), SinkError> {
        self.push(SinkCall::Command {
            session_id: session.session_id.clone(),
            record: record.clone(),
        })
    }

    async fn session_ended(
        &self,
        session: &SessionInfo,
        summary: &SessionSummary,
    ) -> Result<(), SinkError> {
        self.push(SinkCall::Ended {
            session_id: session.session_id.clone(),
            summary: summary.clone(),
        })
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
