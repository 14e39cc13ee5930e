// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted audit record schema

use chrono::{DateTime, Utc};
use mirage_core::{
    Category, CloseReason, CommandRecord, ResolutionPath, SensitivityTier, SessionId,
};
use serde::{Deserialize, Serialize};

/// One line of the audit log.
///
/// Serialized with a `type` tag so the file can be grepped by record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    SessionStarted {
        session_id: SessionId,
        peer_address: String,
        started_at: DateTime<Utc>,
    },
    Command {
        session_id: SessionId,
        peer_address: String,
        timestamp: DateTime<Utc>,
        raw_input: String,
        category: Category,
        tier: SensitivityTier,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        ambiguous: bool,
        resolution_path: ResolutionPath,
        attempt_count: u32,
        resolved_output: String,
    },
    SessionEnded {
        session_id: SessionId,
        peer_address: String,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        reason: CloseReason,
        command_count: usize,
        final_cwd: String,
    },
    /// Written once storage is writable again after an outage
    StorageDegraded {
        since: DateTime<Utc>,
        recovered_at: DateTime<Utc>,
        dropped_records: u64,
    },
}

impl AuditRecord {
    pub fn command(session_id: &SessionId, peer_address: &str, record: &CommandRecord) -> Self {
        AuditRecord::Command {
            session_id: session_id.clone(),
            peer_address: peer_address.to_string(),
            timestamp: record.timestamp,
            raw_input: record.raw_input.clone(),
            category: record.classification.category,
            tier: record.classification.tier,
            ambiguous: record.classification.ambiguous,
            resolution_path: record.resolution_path,
            attempt_count: record.attempt_count,
            resolved_output: record.resolved_output.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditRecord::SessionStarted { .. } => "session_started",
            AuditRecord::Command { .. } => "command",
            AuditRecord::SessionEnded { .. } => "session_ended",
            AuditRecord::StorageDegraded { .. } => "storage_degraded",
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            AuditRecord::SessionStarted { session_id, .. }
            | AuditRecord::Command { session_id, .. }
            | AuditRecord::SessionEnded { session_id, .. } => Some(session_id),
            AuditRecord::StorageDegraded { .. } => None,
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
