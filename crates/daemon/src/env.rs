// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.
//!
//! Unset or unparseable values fall back to their defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mirage_adapters::DEFAULT_GEMINI_MODEL;

use crate::lifecycle::LifecycleError;

pub const DEFAULT_BIND: &str = "0.0.0.0:2222";
pub const DEFAULT_MAX_SESSIONS: usize = 64;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_COMMANDS: usize = 500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Resolve state directory: MIRAGE_STATE_DIR > XDG_STATE_HOME/mirage > ~/.local/state/mirage
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("MIRAGE_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("mirage"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/mirage"))
}

/// Listen address for attacker connections
pub fn bind_addr() -> String {
    non_empty("MIRAGE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string())
}

pub fn max_sessions() -> usize {
    positive("MIRAGE_MAX_SESSIONS").unwrap_or(DEFAULT_MAX_SESSIONS)
}

pub fn idle_timeout() -> Duration {
    positive("MIRAGE_IDLE_TIMEOUT_SECS")
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_IDLE_TIMEOUT)
}

/// Commands per session before it is closed
pub fn max_commands() -> usize {
    positive("MIRAGE_MAX_COMMANDS").unwrap_or(DEFAULT_MAX_COMMANDS)
}

/// Generator calls per command
pub fn max_attempts() -> u32 {
    positive("MIRAGE_MAX_ATTEMPTS").unwrap_or(DEFAULT_MAX_ATTEMPTS)
}

pub fn generator_timeout() -> Duration {
    positive("MIRAGE_GENERATOR_TIMEOUT_MS")
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_GENERATOR_TIMEOUT)
}

/// First retry delay; zero disables backoff
pub fn retry_backoff() -> Duration {
    parse::<u64>("MIRAGE_RETRY_BACKOFF_MS")
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RETRY_BACKOFF)
}

/// Policy file overriding the built-in one
pub fn policy_path() -> Option<PathBuf> {
    non_empty("MIRAGE_POLICY_PATH").map(PathBuf::from)
}

/// API key for the Gemini generator. Without one the daemon runs offline.
pub fn gemini_api_key() -> Option<String> {
    non_empty("GEMINI_API_KEY")
}

pub fn gemini_model() -> String {
    non_empty("MIRAGE_GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string())
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(name: &str) -> Option<T> {
    non_empty(name).and_then(|v| v.parse().ok())
}

fn positive<T: FromStr + Default + PartialOrd>(name: &str) -> Option<T> {
    parse::<T>(name).filter(|v| *v > T::default())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
