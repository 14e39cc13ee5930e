// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mirage Daemon (miraged)
//!
//! Listens for attacker connections and runs one simulated shell session
//! per connection.
//!
//! Architecture:
//! - Dispatcher Task: accepts connections, one task per session
//! - Audit Writer Task: owns the audit log, group-commits session records
//! - Main: signal handling and orderly teardown

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;
mod forensic;
mod generator;
mod lifecycle;
mod listener;

use std::path::Path;
use std::sync::Arc;

use mirage_core::{SystemClock, UuidIdGen};
use mirage_engine::{ConsistencyEngine, SessionContext};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::forensic::spawn_audit_writer;
use crate::generator::DaemonGenerator;
use crate::lifecycle::{Config, LifecycleError, StartupResult};
use crate::listener::{Dispatcher, DispatcherConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("miraged {VERSION}");
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("miraged {VERSION}");
                println!("Mirage Daemon - interactive shell honeypot backed by a text generator");
                println!();
                println!("USAGE:");
                println!("    miraged");
                println!();
                println!("Configuration is read from the environment:");
                println!(
                    "    MIRAGE_BIND                  listen address (default {})",
                    env::DEFAULT_BIND
                );
                println!("    MIRAGE_STATE_DIR             state directory for logs and the audit trail");
                println!("    MIRAGE_POLICY_PATH           sensitivity policy and persona (TOML)");
                println!("    MIRAGE_MAX_SESSIONS          concurrent session cap");
                println!("    MIRAGE_IDLE_TIMEOUT_SECS     idle session timeout");
                println!("    MIRAGE_MAX_COMMANDS          commands per session");
                println!("    GEMINI_API_KEY               generator API key; offline without it");
                println!("    MIRAGE_GEMINI_MODEL          generator model");
                println!("    RUST_LOG                     log filter (default info)");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: miraged [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    rotate_log_if_needed(&config.log_path);

    // Write startup marker to log (before tracing setup)
    write_startup_marker(&config)?;

    let log_guard = setup_logging(&config)?;

    info!(version = VERSION, "Starting daemon");

    let StartupResult {
        mut daemon,
        listener,
        audit,
    } = match lifecycle::startup(&config).await {
        Ok(r) => r,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("miraged is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            // Write error synchronously (tracing is non-blocking and may not flush in time)
            write_startup_error(&config, &e);
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let generator = DaemonGenerator::from_key(config.gemini_api_key.clone(), &config.gemini_model);
    if config.gemini_api_key.is_none() {
        warn!("no generator API key configured, generator-path commands use fallbacks");
    }
    info!(generator = %generator.inner().describe(), "generator selected");

    let (sink, writer) = spawn_audit_writer(audit, SystemClock);
    let engine = ConsistencyEngine::new(
        generator,
        Arc::clone(&daemon.policy),
        config.engine.clone(),
    );
    let ctx = SessionContext::new(engine, sink, SystemClock, config.session.clone());
    let dispatcher = Dispatcher::new(
        listener,
        ctx,
        UuidIdGen,
        daemon.policy.persona().banner.clone(),
        DispatcherConfig {
            max_sessions: config.max_sessions,
            shutdown_grace: config.shutdown_grace,
        },
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(dispatcher.run(shutdown_rx));

    info!(
        bind = %config.bind,
        max_sessions = config.max_sessions,
        "Daemon ready"
    );

    // Signal ready for a supervising process
    println!("READY");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher.await {
        error!(error = %e, "dispatcher task failed");
    }

    // Every sink handle lived in the dispatcher, so the writer now drains
    // its queue and returns the log.
    match writer.await {
        Ok(log) => info!(seq = log.write_seq(), "audit log closed"),
        Err(e) => error!(error = %e, "audit writer task failed"),
    }

    daemon.shutdown()?;
    info!("Daemon stopped");
    Ok(())
}

/// Rotate once the log passes this size
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated copies kept (`.1` is the newest)
const MAX_ROTATIONS: u32 = 3;

/// Rotate `path` to `path.1`, shifting older copies and dropping the oldest.
fn rotate_log_if_needed(path: &Path) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() <= MAX_LOG_SIZE {
        return;
    }
    let rotated = |n: u32| {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        std::path::PathBuf::from(name)
    };
    for n in (1..MAX_ROTATIONS).rev() {
        let from = rotated(n);
        if from.exists() {
            let _ = std::fs::rename(&from, rotated(n + 1));
        }
    }
    let _ = std::fs::rename(path, rotated(1));
}

/// Startup marker prefix written to log before anything else.
/// Full format: "--- miraged: starting (pid: 12345)"
pub const STARTUP_MARKER_PREFIX: &str = "--- miraged: starting (pid: ";

/// Write startup marker to log file (appends to existing log)
fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{}{})", STARTUP_MARKER_PREFIX, std::process::id())?;

    Ok(())
}

/// Write startup error synchronously to log file.
fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {}", error);
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
