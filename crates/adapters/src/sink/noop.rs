// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op forensic sink.

use super::{ForensicSink, SessionInfo, SessionSummary, SinkError};
use async_trait::async_trait;
use mirage_core::CommandRecord;

/// Sink that silently discards all records.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpForensicSink;

impl NoOpForensicSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ForensicSink for NoOpForensicSink {
    fn session_started(&self, _session: &SessionInfo) -> Result<(), SinkError> {
        Ok(())
    }

    fn record(&self, _session: &SessionInfo, _record: &CommandRecord) -> Result<(), SinkError> {
        Ok(())
    }

    async fn session_ended(
        &self,
        _session: &SessionInfo,
        _summary: &SessionSummary,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}
