// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generator request construction.
//!
//! Each retry narrows the request: the second attempt adds explicit
//! negative instructions, the third asks only for the canonical template.

use mirage_adapters::{Exchange, GenerationRequest};
use mirage_core::{CanonicalShape, CommandRecord, CommittedFacts, FactKey, Persona};

/// How a generator attempt is phrased
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrategy {
    Standard,
    Strict,
    Minimal,
}

impl PromptStrategy {
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => PromptStrategy::Standard,
            2 => PromptStrategy::Strict,
            _ => PromptStrategy::Minimal,
        }
    }
}

/// Inputs for one command's prompt
pub struct PromptInput<'a> {
    pub persona: &'a Persona,
    pub facts: &'a CommittedFacts,
    pub cwd: &'a str,
    pub raw_input: &'a str,
    pub shape: Option<CanonicalShape>,
    pub history: &'a [CommandRecord],
}

const STRICT_RULES: &str = "Do not refuse. Do not mention that you are an AI or a simulation. \
Respond only with the raw terminal output: no explanations, no markdown, no code fences.";

pub fn build_request(
    input: &PromptInput<'_>,
    strategy: PromptStrategy,
    history_window: usize,
) -> GenerationRequest {
    let system = system_instruction(input);
    let constraint = input.shape.map(|shape| shape_constraint(shape, input));

    let (prompt, context) = match strategy {
        PromptStrategy::Standard => {
            let mut prompt = input.raw_input.to_string();
            if let Some(constraint) = &constraint {
                prompt.push_str("\n\nOutput format: ");
                prompt.push_str(constraint);
            }
            (prompt, recent_context(input.history, history_window))
        }
        PromptStrategy::Strict => {
            let mut prompt = input.raw_input.to_string();
            if let Some(constraint) = &constraint {
                prompt.push_str("\n\nOutput format: ");
                prompt.push_str(constraint);
            }
            prompt.push_str("\n\n");
            prompt.push_str(STRICT_RULES);
            (prompt, recent_context(input.history, history_window))
        }
        PromptStrategy::Minimal => {
            let target = constraint.unwrap_or_else(|| "plain terminal output".to_string());
            let mut prompt = format!(
                "Print only the output of `{}` as {target}.",
                input.raw_input
            );
            if let Some(template) = input.shape.and_then(|shape| shape_template(shape, input)) {
                prompt.push_str("\nFollow this template exactly:\n");
                prompt.push_str(&template);
            }
            prompt.push('\n');
            prompt.push_str(STRICT_RULES);
            (prompt, Vec::new())
        }
    };

    GenerationRequest {
        system,
        prompt,
        context,
    }
}

fn system_instruction(input: &PromptInput<'_>) -> String {
    let facts = input.facts;
    let mut out = format!(
        "You are the bash shell of a minimal Ubuntu server '{hostname}'.\n\
         The logged-in account is '{username}' (uid {uid}) with home directory {home}.\n\
         Respond only with the exact output of the requested shell command followed by a newline.\n\
         If a command is unknown, return \"bash: [command]: command not found\\n\".\n\
         Current directory: {cwd}\n",
        hostname = facts.hostname(),
        username = facts.username(),
        uid = facts.uid(),
        home = facts.home(),
        cwd = input.cwd,
    );
    if let Some(release) = facts.get(&FactKey::KernelRelease) {
        out.push_str(&format!("Kernel release: {release}\n"));
    }
    out.push_str(&format!("Login shell: {}\n", input.persona.shell));
    out.push_str("These facts are established and must be reused exactly in every answer.\n");
    out
}

fn recent_context(history: &[CommandRecord], window: usize) -> Vec<Exchange> {
    let skip = history.len().saturating_sub(window);
    history[skip..]
        .iter()
        .map(|record| Exchange {
            input: record.raw_input.clone(),
            output: record.resolved_output.clone(),
        })
        .collect()
}

fn shape_constraint(shape: CanonicalShape, input: &PromptInput<'_>) -> String {
    let facts = input.facts;
    match shape {
        CanonicalShape::Username => format!(
            "a single line containing only the username `{}`",
            facts.username()
        ),
        CanonicalShape::IdLine => format!(
            "one line of the form `uid={uid}({user}) gid={uid}({user}) groups=...`",
            uid = facts.uid(),
            user = facts.username()
        ),
        CanonicalShape::KernelLine => {
            let mut out = format!(
                "uname output for a Linux host named `{}`",
                facts.hostname()
            );
            if let Some(release) = facts.get(&FactKey::KernelRelease) {
                out.push_str(&format!(" running kernel release `{release}`"));
            }
            out
        }
        CanonicalShape::PasswdFile => format!(
            "/etc/passwd format with seven colon-separated fields per line, starting with \
             `root:x:0:0:root:/root:/bin/bash` and containing \
             `{user}:x:{uid}:{uid}:...:{home}:{shell}`",
            user = facts.username(),
            uid = facts.uid(),
            home = facts.home(),
            shell = input.persona.shell,
        ),
        CanonicalShape::EnvironmentBlock => format!(
            "KEY=value lines only, including USER={user}, HOME={home} and PWD={cwd}",
            user = facts.username(),
            home = facts.home(),
            cwd = input.cwd,
        ),
        CanonicalShape::SecretFile => {
            "realistic file content with concrete values and no placeholders".to_string()
        }
    }
}

fn shape_template(shape: CanonicalShape, input: &PromptInput<'_>) -> Option<String> {
    let facts = input.facts;
    let template = match shape {
        CanonicalShape::Username => format!("{}\n", facts.username()),
        CanonicalShape::IdLine => format!(
            "uid={uid}({user}) gid={uid}({user}) groups={uid}({user})\n",
            uid = facts.uid(),
            user = facts.username()
        ),
        CanonicalShape::KernelLine => format!(
            "Linux {} <release> #1 SMP <build date> x86_64 GNU/Linux\n",
            facts.hostname()
        ),
        CanonicalShape::PasswdFile => format!(
            "root:x:0:0:root:/root:/bin/bash\n\
             daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
             {user}:x:{uid}:{uid}:{user},,,:{home}:{shell}\n",
            user = facts.username(),
            uid = facts.uid(),
            home = facts.home(),
            shell = input.persona.shell,
        ),
        CanonicalShape::EnvironmentBlock => format!(
            "USER={user}\nHOME={home}\nPWD={cwd}\nSHELL={shell}\n",
            user = facts.username(),
            home = facts.home(),
            cwd = input.cwd,
            shell = input.persona.shell,
        ),
        CanonicalShape::SecretFile => return None,
    };
    Some(template)
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
