// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted generator for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{GenerationRequest, GeneratorAdapter, GeneratorError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One scripted generator outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    Refusal,
    Transport,
    /// Never completes; exercises timeouts and cancellation
    Hang,
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        ScriptedReply::Text(s.into())
    }
}

struct ScriptedState {
    replies: VecDeque<ScriptedReply>,
    /// Used once the queue is drained
    repeat: Option<ScriptedReply>,
    calls: Vec<GenerationRequest>,
}

/// Generator that replays scripted replies in order and records every request
#[derive(Clone)]
pub struct ScriptedGenerator {
    inner: Arc<Mutex<ScriptedState>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedState {
                replies: VecDeque::new(),
                repeat: None,
                calls: Vec::new(),
            })),
        }
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        let generator = Self::new();
        generator.inner.lock().replies.extend(replies);
        generator
    }

    /// Always answer with `reply` once the script is exhausted
    pub fn repeating(reply: ScriptedReply) -> Self {
        let generator = Self::new();
        generator.inner.lock().repeat = Some(reply);
        generator
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.inner.lock().replies.push_back(reply);
    }

    /// Get all recorded requests
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.inner.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// Wait until at least `n` requests have been made
    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl GeneratorAdapter for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        let reply = {
            let mut state = self.inner.lock();
            state.calls.push(request.clone());
            state.replies.pop_front().or_else(|| state.repeat.clone())
        };
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Refusal) => Err(GeneratorError::RefusalDetected(
                "scripted refusal".to_string(),
            )),
            Some(ScriptedReply::Transport) => Err(GeneratorError::Transport(
                "scripted transport failure".to_string(),
            )),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(GeneratorError::Unavailable),
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
