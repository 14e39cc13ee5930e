// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection session data.
//!
//! A `Session` is owned by exactly one session task; nothing here is shared
//! across connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandRecord;

crate::define_id! {
    /// Unique identifier for one attacker connection.
    pub struct SessionId;
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session left the `Active` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    PeerClosed,
    Exit,
    IdleTimeout,
    CommandLimit,
    TransportError,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Exit => "exit",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::CommandLimit => "command_limit",
            CloseReason::TransportError => "transport_error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    peer_address: String,
    started_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    cwd: String,
    previous_cwd: Option<String>,
    history: Vec<CommandRecord>,
    status: SessionStatus,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer_address: impl Into<String>,
        started_at: DateTime<Utc>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            id,
            peer_address: peer_address.into(),
            started_at,
            last_active_at: started_at,
            cwd: cwd.into(),
            previous_cwd: None,
            history: Vec::new(),
            status: SessionStatus::Connecting,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Directory `cd -` returns to
    pub fn previous_cwd(&self) -> Option<&str> {
        self.previous_cwd.as_deref()
    }

    pub fn history(&self) -> &[CommandRecord] {
        &self.history
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Record an accepted directory change.
    pub fn change_cwd(&mut self, cwd: String) {
        let old = std::mem::replace(&mut self.cwd, cwd);
        self.previous_cwd = Some(old);
    }

    /// Append a finished command; the record is immutable from here on.
    pub fn append(&mut self, record: CommandRecord) {
        self.last_active_at = record.timestamp;
        self.history.push(record);
    }

    /// Advance the lifecycle. Transitions only move forward.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        let allowed = matches!(
            (self.status, next),
            (SessionStatus::Connecting, SessionStatus::Active)
                | (SessionStatus::Connecting, SessionStatus::Closing)
                | (SessionStatus::Active, SessionStatus::Closing)
                | (SessionStatus::Closing, SessionStatus::Closed)
        );
        if allowed {
            self.status = next;
        }
        allowed
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
