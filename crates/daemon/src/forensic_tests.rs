// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use mirage_core::{
    Category, Classification, CloseReason, FakeClock, ResolutionPath, SensitivityTier, SessionId,
};
use mirage_storage::read_entries;
use tempfile::tempdir;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_710_408_413 + secs, 0).unwrap()
}

fn info(id: &str) -> SessionInfo {
    SessionInfo {
        session_id: SessionId::new(id),
        peer_address: "198.51.100.4:40022".to_string(),
        started_at: at(0),
    }
}

fn record(input: &str) -> CommandRecord {
    CommandRecord {
        raw_input: input.to_string(),
        classification: Classification {
            category: Category::Unknown,
            tier: SensitivityTier::Standard,
            ambiguous: false,
        },
        resolved_output: format!("bash: {input}: command not found\n"),
        resolution_path: ResolutionPath::FallbackCanned,
        attempt_count: 3,
        timestamp: at(5),
    }
}

fn summary(count: usize) -> SessionSummary {
    SessionSummary {
        ended_at: at(60),
        reason: CloseReason::PeerClosed,
        command_count: count,
        final_cwd: "/tmp".to_string(),
    }
}

#[tokio::test]
async fn session_end_flushes_everything_queued() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (sink, writer) = spawn_audit_writer(AuditLog::open(&path).unwrap(), FakeClock::default());

    let session = info("sess-1");
    sink.session_started(&session).unwrap();
    sink.record(&session, &record("nmap")).unwrap();
    sink.record(&session, &record("masscan")).unwrap();
    sink.session_ended(&session, &summary(2)).await.unwrap();

    let entries = read_entries(&path).unwrap();
    let kinds: Vec<&str> = entries.iter().map(|e| e.record.kind()).collect();
    assert_eq!(kinds, ["session_started", "command", "command", "session_ended"]);
    let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, [1, 2, 3, 4]);

    drop(sink);
    let log = writer.await.unwrap();
    assert_eq!(log.pending_len(), 0);
}

#[tokio::test]
async fn concurrent_sessions_do_not_interleave_lines() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (sink, writer) = spawn_audit_writer(AuditLog::open(&path).unwrap(), FakeClock::default());

    let mut tasks = Vec::new();
    for n in 0..8 {
        let sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            let session = info(&format!("sess-{n}"));
            sink.session_started(&session).unwrap();
            for i in 0..20 {
                sink.record(&session, &record(&format!("cmd{i}"))).unwrap();
                tokio::task::yield_now().await;
            }
            sink.session_ended(&session, &summary(20)).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    drop(sink);
    writer.await.unwrap();

    let entries = read_entries(&path).unwrap();
    assert_eq!(entries.len(), 8 * 22);
    for n in 0..8 {
        let id = format!("sess-{n}");
        let inputs: Vec<String> = entries
            .iter()
            .filter(|e| e.record.session_id().map(|s| s.as_str()) == Some(id.as_str()))
            .filter_map(|e| match &e.record {
                AuditRecord::Command { raw_input, .. } => Some(raw_input.clone()),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("cmd{i}")).collect();
        assert_eq!(inputs, expected, "per-session order for {id}");
    }
}

#[tokio::test]
async fn interval_flush_persists_without_session_end() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (sink, _writer) = spawn_audit_writer(AuditLog::open(&path).unwrap(), FakeClock::default());

    sink.session_started(&info("sess-1")).unwrap();
    for _ in 0..100 {
        if read_entries(&path).map(|e| e.len()).unwrap_or(0) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("record was never flushed");
}

#[tokio::test]
async fn stopped_writer_reports_unavailable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (sink, writer) = spawn_audit_writer(AuditLog::open(&path).unwrap(), FakeClock::default());
    writer.abort();
    let _ = writer.await;

    let err = sink.session_started(&info("sess-1")).unwrap_err();
    assert!(matches!(err, SinkError::StorageUnavailable(_)));
    assert!(sink.session_ended(&info("sess-1"), &summary(0)).await.is_err());
}

#[test]
fn outage_reports_window_once_recovered() {
    let mut outage = Outage::default();
    assert!(outage.recovered(at(1), 0).is_none());

    assert!(outage.failed(at(10), 0));
    assert!(!outage.failed(at(20), 3));
    assert!(outage.is_degraded());

    let notice = outage.recovered(at(30), 2).unwrap();
    assert_eq!(
        notice,
        AuditRecord::StorageDegraded {
            since: at(10),
            recovered_at: at(30),
            dropped_records: 5,
        }
    );
    assert!(!outage.is_degraded());
    assert!(outage.recovered(at(40), 0).is_none());
}
