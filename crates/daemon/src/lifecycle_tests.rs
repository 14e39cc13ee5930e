// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fs2::FileExt;
use std::path::Path;
use tempfile::tempdir;

fn test_config(dir: &Path) -> Config {
    Config {
        state_dir: dir.to_owned(),
        lock_path: dir.join("miraged.pid"),
        log_path: dir.join("miraged.log"),
        audit_path: dir.join("audit").join("audit.jsonl"),
        bind: "127.0.0.1:0".to_string(),
        policy_path: None,
        engine: EngineConfig::default(),
        session: SessionConfig::default(),
        max_sessions: 4,
        shutdown_grace: Duration::from_secs(1),
        gemini_api_key: None,
        gemini_model: "test-model".to_string(),
    }
}

#[tokio::test]
async fn startup_binds_and_writes_pid() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("state"));

    let StartupResult {
        mut daemon,
        listener,
        audit,
    } = startup(&config).await.unwrap();

    assert_ne!(listener.local_addr().unwrap().port(), 0);
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());
    assert_eq!(audit.path(), config.audit_path.as_path());
    assert_eq!(daemon.policy.persona().username, "user");

    daemon.shutdown().unwrap();
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn startup_lock_failed_does_not_remove_existing_files() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    // Hold an exclusive lock, as a running daemon would
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)
        .unwrap();
    lock_file.lock_exclusive().unwrap();
    std::fs::write(&config.lock_path, b"12345").unwrap();

    let result = startup(&config).await;
    assert!(
        matches!(result, Err(LifecycleError::LockFailed(_))),
        "expected LockFailed"
    );
    assert_eq!(std::fs::read_to_string(&config.lock_path).unwrap(), "12345");
}

#[tokio::test]
async fn startup_rejects_invalid_policy_and_cleans_up() {
    let dir = tempdir().unwrap();
    let policy = dir.path().join("policy.toml");
    std::fs::write(&policy, "disclosure_markers = [\n").unwrap();
    let mut config = test_config(dir.path());
    config.policy_path = Some(policy);

    let result = startup(&config).await;
    assert!(
        matches!(result, Err(LifecycleError::Policy(_))),
        "expected policy error"
    );
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn startup_missing_policy_file_fails() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.policy_path = Some(dir.path().join("missing.toml"));

    assert!(startup(&config).await.is_err());
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn startup_bind_failure_reports_address() {
    let dir = tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config(dir.path());
    config.bind = taken.local_addr().unwrap().to_string();

    match startup(&config).await {
        Err(LifecycleError::BindFailed(addr, _)) => assert_eq!(addr, config.bind),
        Err(e) => panic!("expected BindFailed, got {e}"),
        Ok(_) => panic!("expected BindFailed"),
    }
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn lock_is_released_after_shutdown() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let first = startup(&config).await.unwrap();
    let mut daemon = first.daemon;
    daemon.shutdown().unwrap();
    drop(daemon);
    drop(first.listener);
    drop(first.audit);

    let second = startup(&config).await.unwrap();
    assert!(config.lock_path.exists());
    drop(second);
}
