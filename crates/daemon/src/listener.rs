// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session dispatcher.
//!
//! Accepts TCP connections and runs each session in its own task. The only
//! state shared between sessions is what `SessionContext` carries: the
//! policy, the generator handle and the forensic sink. A semaphore caps
//! concurrent sessions; connections over the cap get the banner and are
//! closed, so the limit looks like an ordinary server hiccup.

use std::sync::Arc;
use std::time::Duration;

use mirage_adapters::{ForensicSink, GeneratorAdapter};
use mirage_core::{Clock, IdGen};
use mirage_engine::SessionContext;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Bound on writing the banner to a turned-away connection
const TURN_AWAY_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed accept (e.g. descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_sessions: usize,
    /// How long shutdown waits for sessions to write their end records
    pub shutdown_grace: Duration,
}

pub struct Dispatcher<G, S, C, I> {
    listener: TcpListener,
    ctx: SessionContext<G, S, C>,
    ids: I,
    banner: String,
    limiter: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl<G, S, C, I> Dispatcher<G, S, C, I>
where
    G: GeneratorAdapter,
    S: ForensicSink,
    C: Clock,
    I: IdGen,
{
    pub fn new(
        listener: TcpListener,
        ctx: SessionContext<G, S, C>,
        ids: I,
        banner: impl Into<String>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            listener,
            ctx,
            ids,
            banner: banner.into(),
            limiter: Arc::new(Semaphore::new(config.max_sessions)),
            config,
        }
    }

    /// Accept until `shutdown` turns true, then wait for every session to
    /// close. Sessions see the same signal and close themselves.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.dispatch(&mut sessions, stream, peer.to_string(), &shutdown)
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "session task failed");
                    }
                }
            }
        }

        info!(active = sessions.len(), "dispatcher stopping, draining sessions");
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "session task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "sessions did not close within the grace period, aborting"
            );
            sessions.shutdown().await;
        }
    }

    fn dispatch(
        &self,
        sessions: &mut JoinSet<()>,
        stream: TcpStream,
        peer: String,
        shutdown: &watch::Receiver<bool>,
    ) {
        let permit = match Arc::clone(&self.limiter).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    peer = %peer,
                    limit = self.config.max_sessions,
                    "session limit reached, turning connection away"
                );
                sessions.spawn(turn_away(stream, format!("{}\n", self.banner)));
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        let ctx = self.ctx.clone();
        let id = self.ids.next_session();
        let shutdown = shutdown.clone();
        debug!(session_id = %id, peer = %peer, "connection accepted");
        sessions.spawn(async move {
            let _permit = permit;
            ctx.run(id, peer, stream, shutdown).await;
        });
    }
}

/// Resolves once shutdown is signalled or the sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await.map(|_| ());
}

/// Send the banner and hang up.
async fn turn_away(mut stream: TcpStream, banner: String) {
    let _ = tokio::time::timeout(TURN_AWAY_TIMEOUT, async {
        stream.write_all(banner.as_bytes()).await?;
        stream.shutdown().await
    })
    .await;
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
