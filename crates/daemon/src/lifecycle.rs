// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup and shutdown.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use mirage_core::{PolicyError, SensitivityPolicy};
use mirage_engine::{EngineConfig, SessionConfig};
use mirage_storage::{AuditLog, AuditLogError};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::env;

/// How long shutdown waits for open sessions to close
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Daemon configuration.
///
/// Holds the generator API key, so it is deliberately not `Debug`.
#[derive(Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/mirage)
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Path to the forensic audit log
    pub audit_path: PathBuf,
    pub bind: String,
    /// Policy file; the built-in policy is used when unset
    pub policy_path: Option<PathBuf>,
    pub engine: EngineConfig,
    pub session: SessionConfig,
    pub max_sessions: usize,
    pub shutdown_grace: Duration,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        Ok(Self {
            lock_path: state_dir.join("miraged.pid"),
            log_path: state_dir.join("miraged.log"),
            audit_path: state_dir.join("audit").join("audit.jsonl"),
            state_dir,
            bind: env::bind_addr(),
            policy_path: env::policy_path(),
            engine: EngineConfig {
                max_attempts: env::max_attempts(),
                generator_timeout: env::generator_timeout(),
                retry_backoff: env::retry_backoff(),
                ..EngineConfig::default()
            },
            session: SessionConfig {
                idle_timeout: env::idle_timeout(),
                max_commands: env::max_commands(),
            },
            max_sessions: env::max_sessions(),
            shutdown_grace: SHUTDOWN_GRACE,
            gemini_api_key: env::gemini_api_key(),
            gemini_model: env::gemini_model(),
        })
    }
}

/// Daemon state during operation
pub struct Daemon {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub policy: Arc<SensitivityPolicy>,
}

/// Result of daemon startup. The listener and audit log are handed to the
/// dispatcher and the audit writer.
pub struct StartupResult {
    pub daemon: Daemon,
    pub listener: TcpListener,
    pub audit: AuditLog,
}

impl Daemon {
    /// Remove the PID file. The lock itself is released when `lock_file` drops.
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }
        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditLogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // The lock file belongs to the running daemon on LockFailed
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create state directory
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST. Open without truncating so a running
    // daemon's PID survives a failed attempt.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Load the policy. A bad policy file fails startup rather than
    // running with a surprise persona.
    let policy = match &config.policy_path {
        Some(path) => {
            info!(path = %path.display(), "loading policy file");
            SensitivityPolicy::load(path)?
        }
        None => SensitivityPolicy::builtin()?,
    };
    let persona = policy.persona();
    info!(
        hostname = %persona.hostname,
        username = %persona.username,
        "persona loaded"
    );

    // 4. Open the audit log
    if let Some(parent) = config.audit_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let audit = AuditLog::open(&config.audit_path)?;
    info!(path = %config.audit_path.display(), seq = audit.write_seq(), "audit log opened");

    // 5. Bind LAST, only after everything else validated
    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|e| LifecycleError::BindFailed(config.bind.clone(), e))?;

    Ok(StartupResult {
        daemon: Daemon {
            config: config.clone(),
            lock_file,
            policy: Arc::new(policy),
        },
        listener,
        audit,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
