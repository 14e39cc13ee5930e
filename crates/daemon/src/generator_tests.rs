// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn key_selects_gemini() {
    let generator = DaemonGenerator::from_key(Some("k".to_string()), "gemini-2.5-flash");
    assert_eq!(generator.inner().describe(), "gemini (gemini-2.5-flash)");
}

#[tokio::test]
async fn no_key_runs_offline() {
    let generator = DaemonGenerator::from_key(None, "gemini-2.5-flash");
    assert_eq!(generator.inner().describe(), "offline");
    let err = generator
        .generate(&GenerationRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err, GeneratorError::Unavailable);
}

#[yare::parameterized(
    default_model = { "gemini-2.5-flash" },
    pro_model = { "gemini-2.5-pro" },
)]
fn describe_names_the_model(model: &str) {
    let generator = DaemonGenerator::from_key(Some("k".to_string()), model);
    assert_eq!(generator.inner().describe(), format!("gemini ({model})"));
}
