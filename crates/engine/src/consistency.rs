// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response consistency engine.
//!
//! Resolves one generator-path command through a bounded state machine:
//!
//! ```text
//! Classified -> Prompting -> AwaitingGenerator -> Validating
//!     Validating -> Accepted                      (terminal)
//!     Validating -> Retrying -> Prompting
//!     Validating -> Exhausted -> FallbackApplied  (terminal)
//! ```
//!
//! Committed facts are consulted before the generator is ever called, and
//! every accepted or fallback answer to a pinned category is committed so
//! later repeats are byte-identical.

use std::sync::Arc;
use std::time::Duration;

use mirage_adapters::{GenerationRequest, GeneratorAdapter, GeneratorError};
use mirage_core::{
    is_installed, normalize_path, render_template, Category, Classification, CommandRecord,
    CommittedFacts, FactKey, ParsedCommand, ResolutionPath, SensitivityPolicy,
};
use rand::Rng;

use crate::prompt::{build_request, PromptInput, PromptStrategy};
use crate::validate::{Validated, ValidationContext, ValidationFailure, Validator};

/// Release reported by `uname -r` when the persona names no kernel and the
/// generator never disclosed one
const FALLBACK_KERNEL_RELEASE: &str = "5.10.0-28-amd64";

/// Tunables for generator-path resolution
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on generator calls per command
    pub max_attempts: u32,
    pub generator_timeout: Duration,
    /// Delay before the first retry; doubles per retry
    pub retry_backoff: Duration,
    /// Earlier exchanges passed to the generator as context
    pub history_window: usize,
    pub max_output_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            generator_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(250),
            history_window: 20,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// One command handed to the engine
pub struct ResolveRequest<'a> {
    pub raw_input: &'a str,
    pub command: &'a ParsedCommand,
    pub classification: Classification,
    pub cwd: &'a str,
    pub history: &'a [CommandRecord],
}

/// Final answer for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub output: String,
    pub path: ResolutionPath,
    /// Generator calls made
    pub attempt_count: u32,
}

/// States of a single resolution
#[derive(Debug)]
enum ResolutionState {
    Classified,
    Prompting {
        attempt: u32,
    },
    AwaitingGenerator {
        attempt: u32,
        request: GenerationRequest,
    },
    Validating {
        attempt: u32,
        reply: Result<String, GeneratorError>,
    },
    Retrying {
        attempt: u32,
        failure: ValidationFailure,
    },
    Accepted {
        attempt: u32,
        validated: Validated,
    },
    Exhausted {
        attempts: u32,
        failure: ValidationFailure,
    },
    FallbackApplied {
        attempts: u32,
        output: String,
    },
}

impl ResolutionState {
    fn name(&self) -> &'static str {
        match self {
            ResolutionState::Classified => "classified",
            ResolutionState::Prompting { .. } => "prompting",
            ResolutionState::AwaitingGenerator { .. } => "awaiting_generator",
            ResolutionState::Validating { .. } => "validating",
            ResolutionState::Retrying { .. } => "retrying",
            ResolutionState::Accepted { .. } => "accepted",
            ResolutionState::Exhausted { .. } => "exhausted",
            ResolutionState::FallbackApplied { .. } => "fallback_applied",
        }
    }
}

/// Produces output for generator-path commands. Cheap to clone; shared by
/// every session.
#[derive(Clone)]
pub struct ConsistencyEngine<G> {
    generator: G,
    policy: Arc<SensitivityPolicy>,
    validator: Validator,
    config: EngineConfig,
}

impl<G: GeneratorAdapter> ConsistencyEngine<G> {
    pub fn new(generator: G, policy: Arc<SensitivityPolicy>, config: EngineConfig) -> Self {
        let validator = Validator::new(&policy, config.max_output_bytes);
        Self {
            generator,
            policy,
            validator,
            config,
        }
    }

    pub fn policy(&self) -> &Arc<SensitivityPolicy> {
        &self.policy
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve one command, never failing: the result is an accepted
    /// generator answer, a committed fact, or the category's canned fallback.
    pub async fn resolve(
        &self,
        req: &ResolveRequest<'_>,
        facts: &mut CommittedFacts,
    ) -> Resolution {
        if let Some(output) = self.committed_answer(req, facts) {
            let category = req.classification.category;
            tracing::debug!(%category, "answered from committed facts");
            return Resolution {
                output,
                path: ResolutionPath::LocalDeterministic,
                attempt_count: 0,
            };
        }

        let category = req.classification.category;
        let shape = self.policy.shape(category);
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = ResolutionState::Classified;

        loop {
            tracing::trace!(state = state.name(), %category, "resolution step");
            state = match state {
                ResolutionState::Classified => ResolutionState::Prompting { attempt: 1 },

                ResolutionState::Prompting { attempt } => {
                    let input = PromptInput {
                        persona: self.policy.persona(),
                        facts,
                        cwd: req.cwd,
                        raw_input: req.raw_input,
                        shape,
                        history: req.history,
                    };
                    let request = build_request(
                        &input,
                        PromptStrategy::for_attempt(attempt),
                        self.config.history_window,
                    );
                    ResolutionState::AwaitingGenerator { attempt, request }
                }

                ResolutionState::AwaitingGenerator { attempt, request } => {
                    let reply = match tokio::time::timeout(
                        self.config.generator_timeout,
                        self.generator.generate(&request),
                    )
                    .await
                    {
                        Ok(reply) => reply,
                        Err(_) => Err(GeneratorError::Timeout),
                    };
                    ResolutionState::Validating { attempt, reply }
                }

                ResolutionState::Validating { attempt, reply } => {
                    let outcome = reply
                        .map_err(ValidationFailure::Generator)
                        .and_then(|text| {
                            let ctx = ValidationContext {
                                raw_input: req.raw_input,
                                command: req.command,
                                cwd: req.cwd,
                                shape,
                                facts,
                                partial: req.classification.ambiguous,
                            };
                            self.validator.validate(&text, &ctx)
                        });
                    match outcome {
                        Ok(validated) => ResolutionState::Accepted { attempt, validated },
                        Err(failure) if attempt >= max_attempts => ResolutionState::Exhausted {
                            attempts: attempt,
                            failure,
                        },
                        Err(failure) => ResolutionState::Retrying { attempt, failure },
                    }
                }

                ResolutionState::Retrying { attempt, failure } => {
                    tracing::info!(
                        %category,
                        attempt,
                        reason = %failure,
                        "generator attempt rejected"
                    );
                    self.backoff(attempt).await;
                    ResolutionState::Prompting {
                        attempt: attempt + 1,
                    }
                }

                ResolutionState::Exhausted { attempts, failure } => {
                    tracing::warn!(
                        %category,
                        attempts,
                        reason = %failure,
                        "attempts exhausted, using fallback"
                    );
                    ResolutionState::FallbackApplied {
                        attempts,
                        output: self.render_fallback(req, facts),
                    }
                }

                ResolutionState::Accepted { attempt, validated } => {
                    for (key, value) in validated.facts {
                        facts.commit(key, value);
                    }
                    let output = self.pin(req, facts, validated.output);
                    let path = if validated.repaired {
                        ResolutionPath::GeneratorRepaired
                    } else {
                        ResolutionPath::GeneratorAccepted
                    };
                    return Resolution {
                        output,
                        path,
                        attempt_count: attempt,
                    };
                }

                ResolutionState::FallbackApplied { attempts, output } => {
                    let output = self.pin(req, facts, output);
                    return Resolution {
                        output,
                        path: ResolutionPath::FallbackCanned,
                        attempt_count: attempts,
                    };
                }
            };
        }
    }

    /// Answers fully determined by facts already disclosed in this session.
    fn committed_answer(
        &self,
        req: &ResolveRequest<'_>,
        facts: &CommittedFacts,
    ) -> Option<String> {
        let command = req.command;
        match req.classification.category {
            Category::Whoami if command.args.is_empty() => {
                return Some(format!("{}\n", facts.username()));
            }
            Category::SystemInfo => {
                let flags = command.short_flags();
                if flags == ['n'] {
                    return Some(format!("{}\n", facts.hostname()));
                }
                let persona = self.policy.persona();
                let release = facts.get(&FactKey::KernelRelease);
                if flags == ['a'] && release.is_some() && persona.kernel_release() == release {
                    if let Some(kernel) = &persona.kernel {
                        return Some(format!("{kernel}\n"));
                    }
                }
                if flags == ['r'] {
                    if let Some(release) = facts.get(&FactKey::KernelRelease) {
                        return Some(format!("{release}\n"));
                    }
                }
            }
            _ => {}
        }
        self.pin_key(req)
            .and_then(|key| facts.get(&key))
            .map(str::to_string)
    }

    /// Fact key under which this command's output is pinned, if any.
    fn pin_key(&self, req: &ResolveRequest<'_>) -> Option<FactKey> {
        let category = req.classification.category;
        if !category.is_pinned() || req.classification.ambiguous {
            return None;
        }
        let command = req.command;
        let operands = command.operands();
        if command.verb == "cat" && operands.len() == 1 && command.args.len() == 1 {
            let home = &self.policy.persona().home;
            return Some(FactKey::FileContent(normalize_path(operands[0], req.cwd, home)));
        }
        let mut key = command.normalized();
        if category == Category::Environment {
            key.push_str(" @ ");
            key.push_str(req.cwd);
        }
        Some(FactKey::Output(key))
    }

    fn pin(&self, req: &ResolveRequest<'_>, facts: &mut CommittedFacts, output: String) -> String {
        match self.pin_key(req) {
            Some(key) => facts.commit(key, output).to_string(),
            None => output,
        }
    }

    fn render_fallback(&self, req: &ResolveRequest<'_>, facts: &mut CommittedFacts) -> String {
        let classification = req.classification;
        if classification.category == Category::SystemInfo {
            if let Some(output) = uname_fallback(req.command, facts) {
                return output;
            }
        }
        let (command, template) = match classification.category {
            // Bash only says `command not found` for programs that are missing
            Category::Unknown => match missing_program(req.command) {
                Some(missing) => (missing, self.template(Category::Unknown)),
                None => (req.command, self.policy.installed_fallback()),
            },
            Category::AccountDatabase if classification.ambiguous => {
                (reading_segment(req.command), self.template(Category::FileRead))
            }
            category if classification.ambiguous => {
                (reading_segment(req.command), self.template(category))
            }
            category => (req.command, self.template(category)),
        };
        if template.is_empty() {
            return format!("bash: {}: command not found\n", command.verb);
        }

        let operands = command.operands().join(" ");
        let args = if operands.is_empty() {
            command.args.join(" ")
        } else {
            operands
        };
        let kernel_release = facts.get(&FactKey::KernelRelease).unwrap_or_default();
        let vars = [
            ("username", facts.username()),
            ("hostname", facts.hostname()),
            ("uid", facts.uid()),
            ("home", facts.home()),
            ("cwd", req.cwd),
            ("verb", command.verb.as_str()),
            ("args", args.as_str()),
            ("command", req.raw_input),
            ("kernel_release", kernel_release),
        ];
        render_template(template, &vars)
    }

    /// The category's fallback, or the unknown category's when it has none.
    fn template(&self, category: Category) -> &str {
        let own = &self.policy.entry(category).fallback;
        if own.is_empty() {
            &self.policy.entry(Category::Unknown).fallback
        } else {
            own
        }
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.config.retry_backoff;
        if base.is_zero() {
            return;
        }
        let exp = base.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(8));
        let jitter_ms = rand::rng().random_range(0..=(base.as_millis() as u64 / 2));
        tokio::time::sleep(exp + Duration::from_millis(jitter_ms)).await;
    }
}

/// `uname -a` and `uname -r` must report a release; one is committed here
/// if nothing has disclosed it yet.
fn uname_fallback(command: &ParsedCommand, facts: &mut CommittedFacts) -> Option<String> {
    let flags = command.short_flags();
    if flags == ['r'] {
        let release = facts.commit(FactKey::KernelRelease, FALLBACK_KERNEL_RELEASE);
        return Some(format!("{release}\n"));
    }
    if flags.contains(&'a') {
        let release = facts
            .commit(FactKey::KernelRelease, FALLBACK_KERNEL_RELEASE)
            .to_string();
        return Some(format!(
            "Linux {} {release} #1 SMP x86_64 GNU/Linux\n",
            facts.hostname()
        ));
    }
    None
}

/// First simple command naming a program the host lacks.
fn missing_program(command: &ParsedCommand) -> Option<&ParsedCommand> {
    command
        .commands()
        .into_iter()
        .find(|c| !c.verb.is_empty() && !is_installed(&c.verb))
}

/// Segment of a compound line that reads files, for rendering read errors.
fn reading_segment(command: &ParsedCommand) -> &ParsedCommand {
    let segments = command.commands();
    segments
        .iter()
        .find(|c| c.reads_files() && !c.operands().is_empty())
        .or_else(|| {
            segments
                .iter()
                .find(|c| c.operands().iter().any(|p| p.contains('/')))
        })
        .copied()
        .unwrap_or(command)
}

#[cfg(test)]
#[path = "consistency_tests.rs"]
mod tests;
