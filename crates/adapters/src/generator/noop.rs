// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op generator.

use super::{GenerationRequest, GeneratorAdapter, GeneratorError};
use async_trait::async_trait;

/// Generator that never produces text.
///
/// Used when no API key is configured; every generator-path command then
/// resolves to its canned fallback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpGenerator;

impl NoOpGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GeneratorAdapter for NoOpGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GeneratorError> {
        Err(GeneratorError::Unavailable)
    }
}
