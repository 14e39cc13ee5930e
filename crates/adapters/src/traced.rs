// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use crate::generator::{GenerationRequest, GeneratorAdapter, GeneratorError};
use async_trait::async_trait;
use tracing::Instrument;

/// Wrapper that adds tracing to any GeneratorAdapter
#[derive(Clone)]
pub struct TracedGenerator<G> {
    inner: G,
}

impl<G> TracedGenerator<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: GeneratorAdapter> GeneratorAdapter for TracedGenerator<G> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        let span = tracing::info_span!("generator.generate", context_len = request.context.len());
        async {
            tracing::debug!(prompt_len = request.prompt.len(), "requesting");
            let start = std::time::Instant::now();
            let result = self.inner.generate(request).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(text) => tracing::info!(elapsed_ms, output_len = text.len(), "generated"),
                Err(GeneratorError::Unavailable) => {
                    tracing::debug!(elapsed_ms, "generator unavailable")
                }
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "generation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
