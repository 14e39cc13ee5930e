// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine.
//!
//! One `SessionMachine` drives one connection from banner to close:
//!
//! ```text
//! Connecting -> Active            banner written
//! Active -> Active                one command: read, classify, resolve, record, reply
//! Active -> Closing               EOF, exit, idle timeout, command cap, shutdown
//! Closing -> Closed               forensic sink notified of the end
//! ```
//!
//! Commands are strictly sequential. The next line is not read until the
//! previous reply has been written and its record queued.

use std::sync::Arc;
use std::time::Duration;

use mirage_adapters::{ForensicSink, GeneratorAdapter, SessionInfo, SessionSummary};
use mirage_core::{
    parse_command, render_template, Classifier, Clock, CloseReason, CommandRecord,
    CommittedFacts, FilesystemModel, ResolutionPath, Session, SessionId, SessionStatus, Skeleton,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

use crate::consistency::{ConsistencyEngine, ResolveRequest};
use crate::error::SessionError;
use crate::local::LocalShell;

/// Longest input line accepted; the remainder is read as the next line
const MAX_LINE_BYTES: u64 = 4096;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Close after this long without input
    pub idle_timeout: Duration,
    /// Close once this many commands have been recorded
    pub max_commands: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            max_commands: 500,
        }
    }
}

/// A finished session and why it ended
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: Session,
    pub reason: CloseReason,
}

/// Everything sessions share. Read-only after construction; cloned into
/// each session task.
#[derive(Clone)]
pub struct SessionContext<G, S, C> {
    engine: ConsistencyEngine<G>,
    classifier: Classifier,
    skeleton: Arc<Skeleton>,
    sink: S,
    clock: C,
    config: SessionConfig,
}

impl<G, S, C> SessionContext<G, S, C>
where
    G: GeneratorAdapter,
    S: ForensicSink,
    C: Clock,
{
    pub fn new(engine: ConsistencyEngine<G>, sink: S, clock: C, config: SessionConfig) -> Self {
        let policy = Arc::clone(engine.policy());
        let skeleton = Arc::new(Skeleton::for_persona(policy.persona()));
        Self {
            engine,
            classifier: Classifier::new(policy),
            skeleton,
            sink,
            clock,
            config,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one connection to completion.
    ///
    /// `shutdown` flipping to `true` closes the session at its next
    /// suspension point with `CloseReason::Shutdown`.
    pub async fn run<T>(
        &self,
        id: SessionId,
        peer_address: String,
        stream: T,
        shutdown: watch::Receiver<bool>,
    ) -> SessionOutcome
    where
        T: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let span = tracing::info_span!("session", session_id = %id, peer = %peer_address);
        self.run_inner(id, peer_address, stream, shutdown)
            .instrument(span)
            .await
    }

    async fn run_inner<T>(
        &self,
        id: SessionId,
        peer_address: String,
        stream: T,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionOutcome
    where
        T: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut machine = SessionMachine::new(self.clone(), id, peer_address);
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = tokio::io::BufReader::new(read_half);

        let reason = machine.drive(&mut reader, &mut writer, &mut shutdown).await;
        // Best effort: the peer may already be gone
        let _ = writer.shutdown().await;
        machine.close(reason).await
    }
}

/// Per-connection state. Owned by exactly one task.
pub struct SessionMachine<G, S, C> {
    ctx: SessionContext<G, S, C>,
    session: Session,
    info: SessionInfo,
    facts: CommittedFacts,
    fs: FilesystemModel,
}

/// Result of one processed command
struct Executed {
    output: String,
    exit: bool,
}

impl<G, S, C> SessionMachine<G, S, C>
where
    G: GeneratorAdapter,
    S: ForensicSink,
    C: Clock,
{
    fn new(ctx: SessionContext<G, S, C>, id: SessionId, peer_address: String) -> Self {
        let started_at = ctx.clock.now();
        let persona = ctx.engine.policy().persona();
        let fs = FilesystemModel::new(
            id.as_str(),
            Arc::clone(&ctx.skeleton),
            persona,
            started_at,
        );
        let facts = CommittedFacts::seeded(persona);
        let session = Session::new(
            id.clone(),
            peer_address.clone(),
            started_at,
            persona.initial_cwd.clone(),
        );
        Self {
            info: SessionInfo {
                session_id: id,
                peer_address,
                started_at,
            },
            session,
            facts,
            fs,
            ctx,
        }
    }

    async fn drive<R, W>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CloseReason
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if let Err(e) = self.ctx.sink.session_started(&self.info) {
            tracing::warn!(error = %e, "forensic sink rejected session start");
        }

        let banner = format!("{}\n", self.ctx.engine.policy().persona().banner);
        if let Err(e) = send(writer, &banner).await {
            tracing::debug!(error = %e, "banner write failed");
            return CloseReason::TransportError;
        }
        self.session.transition(SessionStatus::Active);
        tracing::info!("session started");

        let idle_timeout = self.ctx.config.idle_timeout;
        let mut line = Vec::new();
        loop {
            if let Err(e) = send(writer, &self.prompt()).await {
                tracing::debug!(error = %e, "prompt write failed");
                return CloseReason::TransportError;
            }

            line.clear();
            let idle_deadline = Instant::now() + idle_timeout;
            let read = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return CloseReason::Shutdown,
                _ = tokio::time::sleep_until(idle_deadline) => return CloseReason::IdleTimeout,
                read = read_line(reader, &mut line) => read,
            };
            match read {
                Ok(0) => return CloseReason::PeerClosed,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "read failed");
                    return CloseReason::TransportError;
                }
            }

            let raw = String::from_utf8_lossy(&line).trim().to_string();
            if raw.is_empty() {
                continue;
            }

            // Closing the connection or going idle abandons the command
            // without a partial reply
            let idle_deadline = Instant::now() + idle_timeout;
            let executed = tokio::select! {
                biased;
                reason = peer_closed(reader) => return reason,
                _ = shutdown_requested(shutdown) => return CloseReason::Shutdown,
                _ = tokio::time::sleep_until(idle_deadline) => return CloseReason::IdleTimeout,
                executed = self.execute(&raw) => executed,
            };

            if let Err(e) = send(writer, &executed.output).await {
                tracing::debug!(error = %e, "response write failed");
                return CloseReason::TransportError;
            }
            if executed.exit {
                return CloseReason::Exit;
            }
            if self.session.history().len() >= self.ctx.config.max_commands {
                tracing::info!(limit = self.ctx.config.max_commands, "command limit reached");
                return CloseReason::CommandLimit;
            }
        }
    }

    /// Classify, resolve, and record one command.
    async fn execute(&mut self, raw: &str) -> Executed {
        let command = parse_command(raw);
        let classification = self
            .ctx
            .classifier
            .classify_parsed(&command, self.session.cwd());
        let timestamp = self.ctx.clock.now();
        let policy = Arc::clone(self.ctx.engine.policy());

        let local = LocalShell {
            policy: policy.as_ref(),
            facts: &self.facts,
            fs: &mut self.fs,
            cwd: self.session.cwd(),
            previous_cwd: self.session.previous_cwd(),
            history: self.session.history(),
            now: timestamp,
        }
        .resolve(raw, &command, classification.category);

        let (output, path, attempt_count, exit) = match local {
            Some(resolution) => {
                if let Some(cwd) = resolution.cwd {
                    self.session.change_cwd(cwd);
                }
                (resolution.output, ResolutionPath::LocalDeterministic, 0, resolution.exit)
            }
            None => {
                let req = ResolveRequest {
                    raw_input: raw,
                    command: &command,
                    classification,
                    cwd: self.session.cwd(),
                    history: self.session.history(),
                };
                let resolution = self.ctx.engine.resolve(&req, &mut self.facts).await;
                (resolution.output, resolution.path, resolution.attempt_count, false)
            }
        };

        tracing::info!(
            category = %classification.category,
            path = path.as_str(),
            attempts = attempt_count,
            "command resolved"
        );

        let record = CommandRecord {
            raw_input: raw.to_string(),
            classification,
            resolved_output: output.clone(),
            resolution_path: path,
            attempt_count,
            timestamp,
        };
        if let Err(e) = self.ctx.sink.record(&self.info, &record) {
            tracing::warn!(error = %e, "forensic sink rejected command record");
        }
        self.session.append(record);

        Executed { output, exit }
    }

    /// Shell prompt for the current directory, home shown as `~`
    fn prompt(&self) -> String {
        let cwd = self.session.cwd();
        let home = self.facts.home();
        let shown = if cwd == home {
            "~".to_string()
        } else if let Some(rest) = cwd.strip_prefix(home).filter(|r| r.starts_with('/')) {
            format!("~{rest}")
        } else {
            cwd.to_string()
        };
        render_template(
            &self.ctx.engine.policy().persona().prompt,
            &[
                ("username", self.facts.username()),
                ("hostname", self.facts.hostname()),
                ("cwd", shown.as_str()),
            ],
        )
    }

    async fn close(mut self, reason: CloseReason) -> SessionOutcome {
        self.session.transition(SessionStatus::Closing);
        let summary = SessionSummary {
            ended_at: self.ctx.clock.now(),
            reason,
            command_count: self.session.history().len(),
            final_cwd: self.session.cwd().to_string(),
        };
        if let Err(e) = self.ctx.sink.session_ended(&self.info, &summary).await {
            tracing::warn!(error = %e, "forensic sink rejected session end");
        }
        self.session.transition(SessionStatus::Closed);
        tracing::info!(
            reason = reason.as_str(),
            commands = summary.command_count,
            "session closed"
        );
        SessionOutcome {
            session: self.session,
            reason,
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<(), SessionError> {
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let mut limited = reader.take(MAX_LINE_BYTES);
    limited.read_until(b'\n', line).await
}

/// Resolves when the peer hangs up. Typed-ahead input stays buffered for
/// the next read.
async fn peer_closed<R: AsyncBufRead + Unpin>(reader: &mut R) -> CloseReason {
    match reader.fill_buf().await {
        Ok([]) => CloseReason::PeerClosed,
        Ok(_) => std::future::pending().await,
        Err(_) => CloseReason::TransportError,
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender never requests shutdown
    let dropped = shutdown.wait_for(|stop| *stop).await.is_err();
    if dropped {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
