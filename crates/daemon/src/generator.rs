// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generator selection for the daemon

use async_trait::async_trait;
use mirage_adapters::{
    GeminiGenerator, GenerationRequest, GeneratorAdapter, GeneratorError, NoOpGenerator,
    TracedGenerator,
};

/// Generator the daemon runs with, chosen once at startup
#[derive(Clone)]
pub enum DaemonGenerator {
    Gemini(GeminiGenerator),
    /// No API key: every generator-path command resolves to its fallback
    Offline(NoOpGenerator),
}

impl DaemonGenerator {
    pub fn from_key(api_key: Option<String>, model: &str) -> TracedGenerator<Self> {
        let generator = match api_key {
            Some(key) => DaemonGenerator::Gemini(GeminiGenerator::new(key, model)),
            None => DaemonGenerator::Offline(NoOpGenerator::new()),
        };
        TracedGenerator::new(generator)
    }

    pub fn describe(&self) -> String {
        match self {
            DaemonGenerator::Gemini(g) => format!("gemini ({})", g.model()),
            DaemonGenerator::Offline(_) => "offline".to_string(),
        }
    }
}

#[async_trait]
impl GeneratorAdapter for DaemonGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        match self {
            DaemonGenerator::Gemini(g) => g.generate(request).await,
            DaemonGenerator::Offline(g) => g.generate(request).await,
        }
    }
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
