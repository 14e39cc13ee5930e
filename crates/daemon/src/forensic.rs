// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forensic sink backed by the audit log.
//!
//! Sessions enqueue records on a channel and never wait on disk. A single
//! writer task owns the `AuditLog`, so records from concurrent sessions are
//! serialized here and group-committed on a short interval.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirage_adapters::{ForensicSink, SessionInfo, SessionSummary, SinkError};
use mirage_core::{Clock, CommandRecord};
use mirage_storage::{AuditLog, AuditRecord};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Flush interval for group commit (~10ms durability window)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

enum AuditMessage {
    Record(AuditRecord),
    /// Flush everything queued so far and report the outcome
    Flush(oneshot::Sender<Result<(), SinkError>>),
}

fn writer_stopped() -> SinkError {
    SinkError::StorageUnavailable("audit writer stopped".to_string())
}

/// Handle sessions use to reach the audit writer
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditMessage>,
}

impl AuditSink {
    fn enqueue(&self, record: AuditRecord) -> Result<(), SinkError> {
        self.tx
            .send(AuditMessage::Record(record))
            .map_err(|_| writer_stopped())
    }
}

#[async_trait]
impl ForensicSink for AuditSink {
    fn session_started(&self, session: &SessionInfo) -> Result<(), SinkError> {
        self.enqueue(AuditRecord::SessionStarted {
            session_id: session.session_id.clone(),
            peer_address: session.peer_address.clone(),
            started_at: session.started_at,
        })
    }

    fn record(&self, session: &SessionInfo, record: &CommandRecord) -> Result<(), SinkError> {
        self.enqueue(AuditRecord::command(
            &session.session_id,
            &session.peer_address,
            record,
        ))
    }

    async fn session_ended(
        &self,
        session: &SessionInfo,
        summary: &SessionSummary,
    ) -> Result<(), SinkError> {
        self.enqueue(AuditRecord::SessionEnded {
            session_id: session.session_id.clone(),
            peer_address: session.peer_address.clone(),
            started_at: session.started_at,
            ended_at: summary.ended_at,
            reason: summary.reason,
            command_count: summary.command_count,
            final_cwd: summary.final_cwd.clone(),
        })?;
        let (reply, done) = oneshot::channel();
        self.tx
            .send(AuditMessage::Flush(reply))
            .map_err(|_| writer_stopped())?;
        done.await.map_err(|_| writer_stopped())?
    }
}

/// Storage outage bookkeeping, so the gap can be recorded after recovery
#[derive(Debug, Default)]
pub struct Outage {
    since: Option<DateTime<Utc>>,
    dropped: u64,
}

impl Outage {
    /// Note a failed flush. Returns true when this starts a new outage.
    pub fn failed(&mut self, now: DateTime<Utc>, dropped: u64) -> bool {
        self.dropped += dropped;
        if self.since.is_some() {
            return false;
        }
        self.since = Some(now);
        true
    }

    /// Note a successful flush. Returns the record describing the outage
    /// that just ended, if there was one.
    pub fn recovered(&mut self, now: DateTime<Utc>, dropped: u64) -> Option<AuditRecord> {
        let since = self.since.take()?;
        let dropped_records = std::mem::take(&mut self.dropped) + dropped;
        Some(AuditRecord::StorageDegraded {
            since,
            recovered_at: now,
            dropped_records,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.since.is_some()
    }
}

/// Spawn the writer task. It runs until every `AuditSink` clone is
/// dropped, flushes once more, and hands the log back.
pub fn spawn_audit_writer<C: Clock>(log: AuditLog, clock: C) -> (AuditSink, JoinHandle<AuditLog>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = AuditWriter {
        log,
        clock,
        outage: Outage::default(),
    };
    (AuditSink { tx }, tokio::spawn(writer.run(rx)))
}

struct AuditWriter<C> {
    log: AuditLog,
    clock: C,
    outage: Outage,
}

impl<C: Clock> AuditWriter<C> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AuditMessage>) -> AuditLog {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(AuditMessage::Record(record)) => self.append(&record),
                    Some(AuditMessage::Flush(reply)) => {
                        let result = self.flush();
                        // The session may have gone away; the flush still happened
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    if self.log.needs_flush() {
                        let _ = self.flush();
                    }
                }
            }
        }

        let _ = self.flush();
        if self.outage.is_degraded() {
            warn!(
                pending = self.log.pending_len(),
                "audit records lost at shutdown"
            );
        }
        self.log
    }

    fn append(&mut self, record: &AuditRecord) {
        if let Err(e) = self.log.append(record) {
            warn!(error = %e, kind = record.kind(), "failed to encode audit record");
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        match self.log.flush() {
            Ok(()) => {
                let dropped = self.log.take_dropped();
                if let Some(notice) = self.outage.recovered(self.clock.now(), dropped) {
                    info!("audit storage recovered");
                    self.append(&notice);
                    if let Err(e) = self.log.flush() {
                        self.outage.failed(self.clock.now(), 0);
                        warn!(error = %e, "audit storage failed again after recovery");
                    }
                }
                Ok(())
            }
            Err(e) => {
                let dropped = self.log.take_dropped();
                if self.outage.failed(self.clock.now(), dropped) {
                    warn!(
                        error = %e,
                        pending = self.log.pending_len(),
                        "audit storage unavailable, buffering records"
                    );
                }
                Err(SinkError::StorageUnavailable(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
#[path = "forensic_tests.rs"]
mod tests;
