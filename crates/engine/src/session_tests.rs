// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::consistency::EngineConfig;
use mirage_adapters::{FakeForensicSink, ScriptedGenerator, ScriptedReply, SinkCall};
use mirage_core::{Category, FakeClock, SensitivityPolicy};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

const BANNER: &str = "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5\n";
const PROMPT_PREFIX: &str = "user@server-dev-01:";

const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
user:x:1000:1000:user,,,:/home/user:/bin/bash\n";

struct Harness {
    ctx: SessionContext<ScriptedGenerator, FakeForensicSink, FakeClock>,
    generator: ScriptedGenerator,
    sink: FakeForensicSink,
}

fn harness(generator: ScriptedGenerator, config: SessionConfig) -> Harness {
    let policy = Arc::new(SensitivityPolicy::builtin().unwrap());
    let engine = ConsistencyEngine::new(
        generator.clone(),
        policy,
        EngineConfig {
            generator_timeout: Duration::from_secs(30),
            retry_backoff: Duration::ZERO,
            ..EngineConfig::default()
        },
    );
    let sink = FakeForensicSink::new();
    Harness {
        ctx: SessionContext::new(engine, sink.clone(), FakeClock::default(), config),
        generator,
        sink,
    }
}

fn default_harness(replies: impl IntoIterator<Item = ScriptedReply>) -> Harness {
    harness(ScriptedGenerator::with_replies(replies), SessionConfig::default())
}

struct Client {
    io: DuplexStream,
    task: JoinHandle<SessionOutcome>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    fn connect(&self) -> Client {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (shutdown, rx) = watch::channel(false);
        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move {
            ctx.run(
                SessionId::new("sess-1"),
                "203.0.113.7:51000".to_string(),
                server,
                rx,
            )
            .await
        });
        Client {
            io: client,
            task,
            shutdown,
        }
    }
}

impl Client {
    /// Read until the output ends with a shell prompt.
    async fn until_prompt(&mut self) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = self.io.read(&mut chunk).await.unwrap();
            assert!(n > 0, "session closed before prompt: {}", String::from_utf8_lossy(&buf));
            buf.extend_from_slice(&chunk[..n]);
            if buf.ends_with(b"$ ") {
                return String::from_utf8(buf).unwrap();
            }
        }
    }

    /// Send one line and return its output with the following prompt removed.
    async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        let text = self.until_prompt().await;
        let at = text.rfind(PROMPT_PREFIX).unwrap();
        text[..at].to_string()
    }

    async fn send(&mut self, line: &str) {
        self.io.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    /// Read everything until the session closes its side.
    async fn drain(&mut self) -> String {
        let mut out = String::new();
        self.io.read_to_string(&mut out).await.unwrap();
        out
    }

    async fn finish(self) -> SessionOutcome {
        drop(self.io);
        self.task.await.unwrap()
    }
}

#[tokio::test]
async fn banner_then_prompt_on_connect() {
    let h = default_harness([]);
    let mut client = h.connect();
    let greeting = client.until_prompt().await;
    assert_eq!(greeting, format!("{BANNER}user@server-dev-01:/$ "));
}

#[tokio::test]
async fn pwd_after_connect_is_initial_cwd() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    assert_eq!(client.command("pwd").await, "/\n");

    let outcome = client.finish().await;
    let record = &outcome.session.history()[0];
    assert_eq!(record.resolution_path, ResolutionPath::LocalDeterministic);
    assert_eq!(record.attempt_count, 0);
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn cd_changes_later_pwd_and_prompt() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    client.send("cd /var/log").await;
    assert_eq!(client.until_prompt().await, "user@server-dev-01:/var/log$ ");
    assert_eq!(client.command("pwd").await, "/var/log\n");

    client.send("cd ~/.ssh").await;
    assert_eq!(client.until_prompt().await, "user@server-dev-01:~/.ssh$ ");
    client.finish().await;
}

#[tokio::test]
async fn whoami_matches_passwd_user_line() {
    let h = default_harness([ScriptedReply::text(PASSWD)]);
    let mut client = h.connect();
    client.until_prompt().await;

    let user = client.command("whoami").await;
    let user = user.trim_end();
    let passwd = client.command("cat /etc/passwd").await;
    assert!(
        passwd.lines().any(|line| line.split(':').next() == Some(user)),
        "{passwd}"
    );
    client.finish().await;
}

#[tokio::test]
async fn refusals_exhaust_to_fallback() {
    let h = default_harness([
        ScriptedReply::Refusal,
        ScriptedReply::Refusal,
        ScriptedReply::Refusal,
    ]);
    let mut client = h.connect();
    client.until_prompt().await;

    let output = client.command("cat /etc/passwd").await;
    assert!(output.starts_with("root:x:0:0:root:/root:/bin/bash\n"), "{output}");
    assert!(output.contains("user:x:1000:1000:user,,,:/home/user:/bin/bash\n"));

    let outcome = client.finish().await;
    let record = &outcome.session.history()[0];
    assert_eq!(record.resolution_path, ResolutionPath::FallbackCanned);
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.resolved_output, output);
    assert_eq!(h.generator.call_count(), 3);
}

#[tokio::test]
async fn peer_close_mid_generation_writes_no_partial_reply() {
    let h = default_harness([ScriptedReply::Hang]);
    let mut client = h.connect();
    client.until_prompt().await;

    client.send("cat /etc/passwd").await;
    h.generator.wait_for_calls(1).await;

    let outcome = client.finish().await;
    assert_eq!(outcome.reason, CloseReason::PeerClosed);
    assert_eq!(outcome.session.status(), SessionStatus::Closed);
    assert!(outcome.session.history().is_empty());
    assert!(h.sink.records().is_empty());
    let ended = h.sink.ended().unwrap();
    assert_eq!(ended.reason, CloseReason::PeerClosed);
    assert_eq!(ended.command_count, 0);
}

#[tokio::test]
async fn exit_writes_logout_and_closes() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    client.send("exit").await;
    assert_eq!(client.drain().await, "logout\n");

    let outcome = client.task.await.unwrap();
    assert_eq!(outcome.reason, CloseReason::Exit);
    assert_eq!(h.sink.ended().unwrap().reason, CloseReason::Exit);
}

#[tokio::test]
async fn blank_lines_reprompt_without_record() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    assert_eq!(client.command("").await, "");
    assert_eq!(client.command("   ").await, "");
    let outcome = client.finish().await;
    assert!(outcome.session.history().is_empty());
}

#[tokio::test]
async fn crlf_input_is_accepted() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    client.io.write_all(b"pwd\r\n").await.unwrap();
    let text = client.until_prompt().await;
    assert!(text.starts_with("/\n"), "{text}");
    client.finish().await;
}

#[tokio::test]
async fn idle_session_times_out() {
    let h = harness(
        ScriptedGenerator::new(),
        SessionConfig {
            idle_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        },
    );
    let mut client = h.connect();
    client.until_prompt().await;

    let outcome = client.task.await.unwrap();
    assert_eq!(outcome.reason, CloseReason::IdleTimeout);
    assert_eq!(h.sink.ended().unwrap().reason, CloseReason::IdleTimeout);
}

#[tokio::test]
async fn command_limit_closes_after_reply() {
    let h = harness(
        ScriptedGenerator::new(),
        SessionConfig {
            max_commands: 2,
            ..SessionConfig::default()
        },
    );
    let mut client = h.connect();
    client.until_prompt().await;

    assert_eq!(client.command("pwd").await, "/\n");
    client.send("hostname").await;
    assert_eq!(client.drain().await, "server-dev-01\n");

    let outcome = client.task.await.unwrap();
    assert_eq!(outcome.reason, CloseReason::CommandLimit);
    assert_eq!(outcome.session.history().len(), 2);
}

#[tokio::test]
async fn shutdown_closes_waiting_session() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    client.shutdown.send(true).unwrap();
    let outcome = client.task.await.unwrap();
    assert_eq!(outcome.reason, CloseReason::Shutdown);
    assert_eq!(outcome.session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn sink_sees_start_commands_and_end_in_order() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;
    client.command("pwd").await;
    client.command("cd /tmp").await;
    client.command("ls").await;
    client.finish().await;

    let calls = h.sink.calls();
    assert!(matches!(
        calls.first(),
        Some(SinkCall::Started(info)) if info.session_id.as_str() == "sess-1"
    ));
    let inputs: Vec<String> = h.sink.records().into_iter().map(|r| r.raw_input).collect();
    assert_eq!(inputs, ["pwd", "cd /tmp", "ls"]);
    match calls.last() {
        Some(SinkCall::Ended { summary, .. }) => {
            assert_eq!(summary.command_count, 3);
            assert_eq!(summary.final_cwd, "/tmp");
        }
        other => panic!("expected end record, got {other:?}"),
    }
}

#[tokio::test]
async fn unavailable_sink_does_not_break_session() {
    let h = default_harness([]);
    h.sink.set_unavailable(true);
    let mut client = h.connect();
    client.until_prompt().await;

    assert_eq!(client.command("pwd").await, "/\n");
    let outcome = client.finish().await;
    assert_eq!(outcome.session.history().len(), 1);
}

#[tokio::test]
async fn piped_shadow_read_is_denied_without_generator() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    assert_eq!(
        client.command("cat /etc/shadow | head -1").await,
        "cat: /etc/shadow: Permission denied\n"
    );

    let outcome = client.finish().await;
    let record = &outcome.session.history()[0];
    assert_eq!(record.classification.category, Category::SecretRead);
    assert!(record.classification.ambiguous);
    assert_eq!(record.resolution_path, ResolutionPath::LocalDeterministic);
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn touched_file_is_empty_and_local() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    assert_eq!(client.command("touch /tmp/a").await, "");
    let listing = client.command("ls -l /tmp/a").await;
    assert!(listing.contains(" 0 "), "{listing}");
    assert_eq!(client.command("cat /tmp/a").await, "");
    assert_eq!(client.command("uname -r").await, "4.19.0-21-amd64\n");
    assert!(client.command("ls /boot").await.contains("vmlinuz-4.19.0-21-amd64"));

    client.finish().await;
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn repeated_stat_is_byte_identical() {
    let h = default_harness([]);
    let mut client = h.connect();
    client.until_prompt().await;

    let first = client.command("stat /etc/hosts").await;
    client.command("ls -la /etc").await;
    assert_eq!(client.command("stat /etc/hosts").await, first);
    client.finish().await;
}

#[tokio::test]
async fn generator_sees_earlier_commands_as_context() {
    let h = default_harness([ScriptedReply::text("nmap: command not found\n")]);
    let mut client = h.connect();
    client.until_prompt().await;

    client.command("cd /tmp").await;
    client.command("nmap -sV 10.0.0.1").await;

    let calls = h.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].context[0].input, "cd /tmp");
    assert!(calls[0].system.contains("/tmp"));
    client.finish().await;
}

#[tokio::test]
async fn sessions_do_not_share_state() {
    let h = default_harness([]);
    let mut first = h.connect();
    let mut second = h.connect();
    first.until_prompt().await;
    second.until_prompt().await;

    first.command("cd /var").await;
    first.command("touch /tmp/marker").await;
    assert_eq!(second.command("pwd").await, "/\n");
    assert_eq!(
        second.command("ls /tmp/marker").await,
        "ls: cannot access '/tmp/marker': No such file or directory\n"
    );
    first.finish().await;
    second.finish().await;
}
