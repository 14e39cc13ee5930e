// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command classifier: raw input line -> category + sensitivity tier.
//!
//! Classification is a total, deterministic function of the input text and
//! the session's working directory. It never calls the generator; anything it
//! cannot attribute falls through to [`Category::Unknown`].

use std::sync::Arc;

use crate::command::{Category, Classification};
use crate::filesystem::normalize_path;
use crate::policy::SensitivityPolicy;

/// Verbs that print the contents of their file operands
pub const READ_VERBS: &[&str] = &["cat", "head", "tail", "more", "less", "tac", "nl", "strings"];

/// Programs the simulated host has installed beyond the classified verbs
const INSTALLED_VERBS: &[&str] = &[
    "awk", "base64", "chmod", "chown", "cp", "crontab", "curl", "cut", "date", "df", "dmesg",
    "du", "file", "find", "free", "getent", "grep", "groups", "hostnamectl", "ifconfig", "ip",
    "kill", "last", "ln", "lsb_release", "mount", "mv", "nano", "netstat", "perl", "ping", "ps",
    "python3", "rm", "sed", "service", "sh", "sort", "ss", "systemctl", "tar", "top", "tr",
    "uniq", "uptime", "vi", "vim", "w", "wc", "wget", "which", "who", "xargs",
];

/// Whether `verb` exists on the simulated host. Such commands must never
/// be answered with `command not found`.
pub fn is_installed(verb: &str) -> bool {
    READ_VERBS.contains(&verb)
        || INSTALLED_VERBS.contains(&verb)
        || matches!(
            verb,
            "cd" | "pwd" | "ls" | "ll" | "la" | "dir" | "stat" | "touch" | "mkdir" | "echo"
                | "help" | "history" | "hostname" | "whoami" | "id" | "uname" | "env"
                | "printenv" | "sudo" | "su" | "export" | "unset" | "alias" | "unalias"
                | "clear" | "reset" | "true" | ":" | "exit" | "logout"
        )
}

/// Shell-ish tokenisation of one input line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command name with any leading directory stripped (`/bin/ls` -> `ls`)
    pub verb: String,
    pub args: Vec<String>,
    /// Line contains pipes, redirections, separators or substitutions
    pub compound: bool,
    /// Simple commands of a compound line, substitutions included. Empty for
    /// simple input.
    pub segments: Vec<ParsedCommand>,
}

impl ParsedCommand {
    /// Simple commands on this line: the segments of compound input, or
    /// the command itself.
    pub fn commands(&self) -> Vec<&ParsedCommand> {
        if self.segments.is_empty() {
            vec![self]
        } else {
            self.segments.iter().collect()
        }
    }

    /// Arguments that look like file operands.
    ///
    /// Flags are skipped, as is the value following `-n`/`-c` for the
    /// head/tail family.
    pub fn operands(&self) -> Vec<&str> {
        let takes_value = matches!(self.verb.as_str(), "head" | "tail");
        let mut out = Vec::new();
        let mut skip_next = false;
        let mut after_dashdash = false;
        for arg in &self.args {
            if skip_next {
                skip_next = false;
                continue;
            }
            if after_dashdash {
                out.push(arg.as_str());
                continue;
            }
            if arg == "--" {
                after_dashdash = true;
                continue;
            }
            if arg.starts_with('-') && arg.len() > 1 {
                if takes_value && (arg == "-n" || arg == "-c") {
                    skip_next = true;
                }
                continue;
            }
            out.push(arg.as_str());
        }
        out
    }

    /// Single-letter flags, with combined forms expanded (`-la` -> `l`, `a`)
    pub fn short_flags(&self) -> Vec<char> {
        self.args
            .iter()
            .filter(|a| a.starts_with('-') && !a.starts_with("--") && a.len() > 1)
            .flat_map(|a| a.chars().skip(1))
            .collect()
    }

    pub fn has_flag(&self, flag: char) -> bool {
        self.short_flags().contains(&flag)
    }

    pub fn reads_files(&self) -> bool {
        READ_VERBS.contains(&self.verb.as_str())
    }

    /// Verb and arguments re-joined with single spaces
    pub fn normalized(&self) -> String {
        std::iter::once(self.verb.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn simple(words: Vec<String>) -> Self {
        let mut words = words.into_iter();
        let verb = words
            .next()
            .map(|w| match w.rsplit_once('/') {
                Some((_, name)) if !name.is_empty() => name.to_string(),
                _ => w,
            })
            .unwrap_or_default();
        Self {
            verb,
            args: words.collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redirect {
    None,
    /// `< file`: the target is read like an operand
    Input,
    /// `> file`, `>&2`, `<< EOF`: the target is dropped
    Discard,
}

/// Word and segment accumulator for [`parse_command`]
struct Lexer {
    segments: Vec<Vec<String>>,
    words: Vec<String>,
    current: String,
    in_word: bool,
    redirect: Redirect,
    compound: bool,
    /// Commands found inside `$(...)` and backticks
    nested: Vec<ParsedCommand>,
}

impl Lexer {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            words: Vec::new(),
            current: String::new(),
            in_word: false,
            redirect: Redirect::None,
            compound: false,
            nested: Vec::new(),
        }
    }

    fn end_word(&mut self) {
        if !self.in_word {
            return;
        }
        let word = std::mem::take(&mut self.current);
        self.in_word = false;
        if std::mem::replace(&mut self.redirect, Redirect::None) != Redirect::Discard {
            self.words.push(word);
        }
    }

    fn end_segment(&mut self) {
        self.end_word();
        self.redirect = Redirect::None;
        if !self.words.is_empty() {
            self.segments.push(std::mem::take(&mut self.words));
        }
    }

    fn redirect(&mut self, kind: Redirect) {
        self.compound = true;
        // `2>` names a descriptor, not a word
        if self.in_word && self.current.chars().all(|c| c.is_ascii_digit()) {
            self.current.clear();
            self.in_word = false;
        }
        self.end_word();
        self.redirect = kind;
    }

    /// Record a command substitution; its text stays part of the word.
    fn substitution(&mut self, open: &str, body: String, close: char) {
        self.compound = true;
        self.in_word = true;
        self.current.push_str(open);
        self.current.push_str(&body);
        self.current.push(close);
        let inner = parse_command(&body);
        self.nested
            .extend(inner.commands().into_iter().filter(|c| !c.verb.is_empty()).cloned());
    }

    fn finish(mut self) -> ParsedCommand {
        self.end_segment();
        let segments: Vec<ParsedCommand> =
            self.segments.into_iter().map(ParsedCommand::simple).collect();
        let mut command = segments.first().cloned().unwrap_or_default();
        if self.compound {
            command.compound = true;
            command.segments = segments.into_iter().chain(self.nested).collect();
        }
        command
    }
}

/// Body of a `$(...)`, up to the matching parenthesis
fn take_parenthesized(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut depth = 1;
    let mut body = String::new();
    for c in chars.by_ref() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        body.push(c);
    }
    body
}

/// Body of a backtick substitution, up to the closing backtick
fn take_backticked(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    chars.by_ref().take_while(|c| *c != '`').collect()
}

/// Split a line into words, honouring quotes and backslash escapes.
///
/// Pipes, lists, redirections and substitutions mark the command compound
/// and split it into [`ParsedCommand::segments`]. The verb and arguments are
/// those of the first segment.
pub fn parse_command(raw: &str) -> ParsedCommand {
    let mut lx = Lexer::new();
    let mut chars = raw.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                lx.in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    lx.current.push(q);
                }
            }
            '"' => {
                lx.in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                lx.current.push(escaped);
                            }
                        }
                        '`' => {
                            let body = take_backticked(&mut chars);
                            lx.substitution("`", body, '`');
                        }
                        '$' if chars.peek() == Some(&'(') => {
                            chars.next();
                            let body = take_parenthesized(&mut chars);
                            lx.substitution("$(", body, ')');
                        }
                        _ => lx.current.push(q),
                    }
                }
            }
            '\\' => {
                lx.in_word = true;
                if let Some(escaped) = chars.next() {
                    lx.current.push(escaped);
                }
            }
            '`' => {
                let body = take_backticked(&mut chars);
                lx.substitution("`", body, '`');
            }
            '$' if chars.peek() == Some(&'(') => {
                chars.next();
                let body = take_parenthesized(&mut chars);
                lx.substitution("$(", body, ')');
            }
            '|' | ';' | '&' => {
                lx.compound = true;
                if chars.peek() == Some(&c) {
                    chars.next();
                }
                lx.end_segment();
            }
            '>' => {
                lx.redirect(Redirect::Discard);
                if chars.peek() == Some(&'>') {
                    chars.next();
                }
                // `>&2` duplicates a descriptor
                if chars.peek() == Some(&'&') {
                    chars.next();
                }
            }
            '<' => {
                if chars.peek() == Some(&'<') {
                    chars.next();
                    lx.redirect(Redirect::Discard);
                } else {
                    lx.redirect(Redirect::Input);
                }
            }
            c if c.is_whitespace() => lx.end_word(),
            _ => {
                lx.in_word = true;
                lx.current.push(c);
            }
        }
    }
    lx.finish()
}

/// Maps input lines to policy categories
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: Arc<SensitivityPolicy>,
}

impl Classifier {
    pub fn new(policy: Arc<SensitivityPolicy>) -> Self {
        Self { policy }
    }

    pub fn classify(&self, raw: &str, cwd: &str) -> Classification {
        let command = parse_command(raw);
        self.classify_parsed(&command, cwd)
    }

    pub fn classify_parsed(&self, command: &ParsedCommand, cwd: &str) -> Classification {
        if command.compound {
            let category = self.compound_category(command, cwd);
            tracing::debug!(verb = %command.verb, %category, "compound input routed to generator");
            return self.tagged(category, true);
        }
        let category = self.category_for(command, cwd);
        self.tagged(category, false)
    }

    /// A compound line is as sensitive as its most sensitive file read, so a
    /// pipe or substitution never launders a credential path.
    fn compound_category(&self, command: &ParsedCommand, cwd: &str) -> Category {
        let mut category = Category::Unknown;
        for segment in command.commands() {
            match self.category_for(segment, cwd) {
                Category::SecretRead => return Category::SecretRead,
                Category::AccountDatabase => category = Category::AccountDatabase,
                Category::FileRead if category == Category::Unknown => {
                    category = Category::FileRead;
                }
                _ => {}
            }
        }
        category
    }

    fn tagged(&self, category: Category, ambiguous: bool) -> Classification {
        Classification {
            category,
            tier: self.policy.tier(category),
            ambiguous,
        }
    }

    fn category_for(&self, command: &ParsedCommand, cwd: &str) -> Category {
        let home = &self.policy.persona().home;
        let absolute: Vec<String> = command
            .operands()
            .iter()
            .map(|p| normalize_path(p, cwd, home))
            .collect();
        let touches_secret = absolute.iter().any(|p| self.policy.is_secret_path(p));
        // Bare words like `root` only count as paths for the file-reading verbs
        let names_secret_path = command
            .operands()
            .iter()
            .filter(|p| p.contains('/') || p.starts_with('~') || p.starts_with('.'))
            .any(|p| self.policy.is_secret_path(&normalize_path(p, cwd, home)));
        let touches_accounts = absolute.iter().any(|p| self.policy.is_account_path(p));

        match command.verb.as_str() {
            "cd" => Category::Navigation,
            "pwd" => Category::WorkingDirectory,
            "ls" | "ll" | "la" | "dir" => Category::Listing,
            "stat" => Category::FileStat,
            "touch" | "mkdir" => Category::FileCreate,
            verb if READ_VERBS.contains(&verb) => {
                if absolute.is_empty() {
                    Category::Unknown
                } else if touches_secret {
                    Category::SecretRead
                } else if touches_accounts {
                    Category::AccountDatabase
                } else {
                    Category::FileRead
                }
            }
            "getent" if command.args.first().map(String::as_str) == Some("passwd") => {
                Category::AccountDatabase
            }
            "echo" => Category::Echo,
            "help" => Category::Help,
            "history" => Category::History,
            "hostname" if command.args.is_empty() => Category::Hostname,
            "whoami" => Category::Whoami,
            "id" if command.args.is_empty() => Category::IdQuery,
            "uname" => Category::SystemInfo,
            "env" | "printenv" if command.args.is_empty() => Category::Environment,
            "sudo" | "su" => Category::PrivilegeEscalation,
            "export" | "unset" | "alias" | "unalias" | "clear" | "reset" | "true" | ":" => {
                Category::Builtin
            }
            "exit" | "logout" | "quit" => Category::Exit,
            // Any other tool pointed at credential material is still a disclosure attempt
            _ if names_secret_path => Category::SecretRead,
            _ => Category::Unknown,
        }
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
