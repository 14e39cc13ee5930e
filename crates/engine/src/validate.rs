// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generator output repair and validation.
//!
//! Repair strips wrapping a model tends to add around terminal output. The
//! lightweight checks apply to every tier; canonical-shape checks apply to
//! sensitive categories and compare against the session's committed facts.

use std::sync::LazyLock;

use mirage_adapters::GeneratorError;
use mirage_core::{CanonicalShape, CommittedFacts, FactKey, ParsedCommand, SensitivityPolicy};
use regex::Regex;

#[allow(clippy::expect_used)]
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]*$").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static ID_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^uid=(\d+)\(([^)]+)\) gid=(\d+)\(([^)]+)\)( groups=\S+)?$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static PROMPT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+:[^\s]*[$#]\s*$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static ENV_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(<[a-z][a-z0-9 _-]*>|\[(redacted|placeholder|hidden)\]|your[_ -]?([a-z]+[_ -])?(password|secret|key|token)|x{6,}|\.\.\.redacted|lorem ipsum)",
    )
    .expect("constant regex pattern is valid")
});

/// Why a generator attempt was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    Empty,
    DisclosureMarker(String),
    Formatting(String),
    TooLong(usize),
    Shape(String),
    Generator(GeneratorError),
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::Empty => write!(f, "empty output"),
            ValidationFailure::DisclosureMarker(m) => write!(f, "disclosure marker {m:?}"),
            ValidationFailure::Formatting(m) => write!(f, "formatting: {m}"),
            ValidationFailure::TooLong(n) => write!(f, "output too long ({n} bytes)"),
            ValidationFailure::Shape(m) => write!(f, "shape: {m}"),
            ValidationFailure::Generator(e) => write!(f, "generator: {e}"),
        }
    }
}

/// Accepted output plus any facts it disclosed for the first time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub output: String,
    pub repaired: bool,
    pub facts: Vec<(FactKey, String)>,
}

/// What the output is being checked against
pub struct ValidationContext<'a> {
    pub raw_input: &'a str,
    pub command: &'a ParsedCommand,
    pub cwd: &'a str,
    pub shape: Option<CanonicalShape>,
    pub facts: &'a CommittedFacts,
    /// Output passed through a pipeline, so only a fragment of the canonical
    /// shape is expected
    pub partial: bool,
}

#[derive(Debug, Clone)]
pub struct Validator {
    markers: Vec<String>,
    max_output_bytes: usize,
}

impl Validator {
    pub fn new(policy: &SensitivityPolicy, max_output_bytes: usize) -> Self {
        Self {
            markers: policy.disclosure_markers().to_vec(),
            max_output_bytes,
        }
    }

    pub fn validate(
        &self,
        raw: &str,
        ctx: &ValidationContext<'_>,
    ) -> Result<Validated, ValidationFailure> {
        let (output, repaired) = repair(raw, ctx.raw_input);
        self.check_light(&output)?;
        let facts = match ctx.shape {
            Some(shape) => check_shape(shape, &output, ctx)?,
            None => Vec::new(),
        };
        Ok(Validated {
            output,
            repaired,
            facts,
        })
    }

    fn check_light(&self, output: &str) -> Result<(), ValidationFailure> {
        if output.trim().is_empty() {
            return Err(ValidationFailure::Empty);
        }
        if output.len() > self.max_output_bytes {
            return Err(ValidationFailure::TooLong(output.len()));
        }
        let lowered = output.to_lowercase();
        if let Some(marker) = self.markers.iter().find(|m| lowered.contains(m.as_str())) {
            return Err(ValidationFailure::DisclosureMarker(marker.clone()));
        }
        if let Some(c) = output
            .chars()
            .find(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\x1b'))
        {
            return Err(ValidationFailure::Formatting(format!(
                "control character U+{:04X}",
                c as u32
            )));
        }
        if output.contains("```") {
            return Err(ValidationFailure::Formatting("markdown fence".to_string()));
        }
        Ok(())
    }
}

/// Strip wrapping around terminal output.
///
/// Returns the cleaned text (always newline-terminated when non-empty) and
/// whether anything beyond whitespace had to be removed.
pub fn repair(raw: &str, raw_input: &str) -> (String, bool) {
    let mut repaired = false;

    let mut text = raw.to_string();
    if text.contains('\r') {
        text = text.replace("\r\n", "\n").replace('\r', "\n");
        repaired = true;
    }

    let mut lines: Vec<&str> = text.lines().collect();
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    // ```bash ... ```
    if lines.first().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.remove(0);
        if lines.last().is_some_and(|l| l.trim() == "```") {
            lines.pop();
        }
        repaired = true;
    }

    let input = raw_input.trim();
    if !input.is_empty() {
        if let Some(first) = lines.first() {
            let first = first.trim();
            let echoed = first == input
                || first == format!("$ {input}")
                || first == format!("# {input}")
                || (first.ends_with(&format!("$ {input}")) && first.contains('@'));
            if echoed {
                lines.remove(0);
                repaired = true;
            }
        }
    }

    if lines.last().is_some_and(|l| PROMPT_LINE_RE.is_match(l.trim())) {
        lines.pop();
        repaired = true;
    }

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    if lines.is_empty() {
        return (String::new(), repaired);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    (out, repaired)
}

fn single_line(output: &str) -> Result<&str, ValidationFailure> {
    let mut lines = output.lines();
    match (lines.next(), lines.next()) {
        (Some(line), None) => Ok(line.trim_end()),
        _ => Err(ValidationFailure::Shape("expected a single line".to_string())),
    }
}

fn shape_err(message: impl Into<String>) -> ValidationFailure {
    ValidationFailure::Shape(message.into())
}

fn check_shape(
    shape: CanonicalShape,
    output: &str,
    ctx: &ValidationContext<'_>,
) -> Result<Vec<(FactKey, String)>, ValidationFailure> {
    let facts = ctx.facts;
    match shape {
        CanonicalShape::Username => {
            let line = single_line(output)?;
            if !USERNAME_RE.is_match(line) {
                return Err(shape_err(format!("not a username: {line:?}")));
            }
            if line != facts.username() {
                return Err(shape_err(format!(
                    "username {line:?} contradicts committed {:?}",
                    facts.username()
                )));
            }
            Ok(Vec::new())
        }
        CanonicalShape::IdLine => {
            let line = single_line(output)?;
            let caps = ID_LINE_RE
                .captures(line)
                .ok_or_else(|| shape_err("not an id line"))?;
            if &caps[1] != facts.uid() || &caps[2] != facts.username() {
                return Err(shape_err(format!(
                    "uid={}({}) contradicts committed uid={}({})",
                    &caps[1],
                    &caps[2],
                    facts.uid(),
                    facts.username()
                )));
            }
            Ok(Vec::new())
        }
        CanonicalShape::KernelLine => check_uname(output, ctx),
        CanonicalShape::PasswdFile => {
            check_passwd(output, facts, ctx.partial)?;
            Ok(Vec::new())
        }
        CanonicalShape::EnvironmentBlock => {
            check_environment(output, ctx)?;
            Ok(Vec::new())
        }
        CanonicalShape::SecretFile => {
            if let Some(m) = PLACEHOLDER_RE.find(output) {
                return Err(shape_err(format!("placeholder {:?}", m.as_str())));
            }
            Ok(Vec::new())
        }
    }
}

fn check_release(
    release: &str,
    facts: &CommittedFacts,
) -> Result<Vec<(FactKey, String)>, ValidationFailure> {
    if release.is_empty() || release.contains(char::is_whitespace) {
        return Err(shape_err("malformed kernel release"));
    }
    match facts.get(&FactKey::KernelRelease) {
        Some(committed) if committed != release => Err(shape_err(format!(
            "kernel release {release:?} contradicts committed {committed:?}"
        ))),
        Some(_) => Ok(Vec::new()),
        None => Ok(vec![(FactKey::KernelRelease, release.to_string())]),
    }
}

fn check_uname(
    output: &str,
    ctx: &ValidationContext<'_>,
) -> Result<Vec<(FactKey, String)>, ValidationFailure> {
    let line = single_line(output)?;
    let facts = ctx.facts;
    let flags = ctx.command.short_flags();
    let only = |f: char| !flags.is_empty() && flags.iter().all(|c| *c == f);

    if flags.contains(&'a') {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 || tokens[0] != "Linux" {
            return Err(shape_err("uname -a must start with the kernel name"));
        }
        if tokens[1] != facts.hostname() {
            return Err(shape_err(format!(
                "node name {:?} contradicts committed {:?}",
                tokens[1],
                facts.hostname()
            )));
        }
        return check_release(tokens[2], facts);
    }
    if only('r') {
        return check_release(line, facts);
    }
    if only('n') {
        if line != facts.hostname() {
            return Err(shape_err("node name contradicts committed hostname"));
        }
        return Ok(Vec::new());
    }
    if flags.is_empty() || only('s') {
        if line != "Linux" {
            return Err(shape_err("kernel name must be Linux"));
        }
        return Ok(Vec::new());
    }
    // Other flag mixes (-m, -o, -sr...) only need to be one terminal line
    Ok(Vec::new())
}

fn check_passwd(
    output: &str,
    facts: &CommittedFacts,
    partial: bool,
) -> Result<(), ValidationFailure> {
    let mut saw_root = false;
    let mut saw_user = false;
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(':').collect();
        // cut, awk and friends leave fragments that cannot contradict anything
        if partial && fields.len() != 7 {
            continue;
        }
        if fields.len() != 7 {
            return Err(shape_err(format!("passwd line has {} fields", fields.len())));
        }
        if fields[2].parse::<u32>().is_err() || fields[3].parse::<u32>().is_err() {
            return Err(shape_err("non-numeric uid/gid"));
        }
        if fields[0] == "root" {
            saw_root = fields[2] == "0";
        }
        if fields[0] == facts.username() {
            if fields[2] != facts.uid() {
                return Err(shape_err(format!(
                    "uid {} for {} contradicts committed {}",
                    fields[2],
                    fields[0],
                    facts.uid()
                )));
            }
            if fields[5] != facts.home() {
                return Err(shape_err("home directory contradicts committed value"));
            }
            saw_user = true;
        } else if fields[2] == facts.uid() {
            return Err(shape_err("committed uid assigned to another account"));
        }
    }
    if partial {
        return Ok(());
    }
    if !saw_root {
        return Err(shape_err("missing root entry"));
    }
    if !saw_user {
        return Err(shape_err(format!("missing entry for {}", facts.username())));
    }
    Ok(())
}

fn check_environment(output: &str, ctx: &ValidationContext<'_>) -> Result<(), ValidationFailure> {
    let facts = ctx.facts;
    let mut saw_user = false;
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| shape_err("line is not KEY=value"))?;
        if !ENV_KEY_RE.is_match(key) {
            return Err(shape_err(format!("invalid variable name {key:?}")));
        }
        let expected = match key {
            "USER" | "LOGNAME" => {
                saw_user = true;
                Some(facts.username())
            }
            "HOME" => Some(facts.home()),
            "PWD" => Some(ctx.cwd),
            _ => None,
        };
        if let Some(expected) = expected {
            if value != expected {
                return Err(shape_err(format!("{key}={value} contradicts {expected}")));
            }
        }
    }
    if !saw_user {
        return Err(shape_err("environment lacks USER"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
