// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic resolution of commands the session answers itself.
//!
//! Navigation, listing, file creation and shell builtins never reach the
//! generator. File reads are prechecked against the filesystem model so a
//! missing or unreadable path gets the real shell's error instead of
//! invented content.

use chrono::{DateTime, Utc};
use mirage_core::{
    render_template, Access, Category, CommandRecord, CommittedFacts, FilesystemModel, FsError,
    NodeKind, ParsedCommand, SensitivityPolicy,
};

use crate::listing;

/// Escape sequence bash's `clear` writes
const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

/// Aliases from Ubuntu's stock `.bashrc`
const DEFAULT_ALIASES: &str = "alias egrep='egrep --color=auto'\n\
alias fgrep='fgrep --color=auto'\n\
alias grep='grep --color=auto'\n\
alias l='ls -CF'\n\
alias la='ls -A'\n\
alias ll='ls -alF'\n\
alias ls='ls --color=auto'\n";

/// Pipeline stages that print nothing when their input is empty
const STDIN_FILTERS: &[&str] = &[
    "cat", "head", "tail", "tac", "nl", "less", "more", "strings", "grep", "egrep", "fgrep", "sort",
    "uniq", "cut", "tr", "sed", "awk", "base64", "xxd",
];

/// Output of a locally resolved command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResolution {
    pub output: String,
    /// New working directory, when the command changed it
    pub cwd: Option<String>,
    /// Command ends the session
    pub exit: bool,
}

impl LocalResolution {
    fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            cwd: None,
            exit: false,
        }
    }
}

/// Borrowed view of one session's state for local resolution
pub struct LocalShell<'a> {
    pub policy: &'a SensitivityPolicy,
    pub facts: &'a CommittedFacts,
    pub fs: &'a mut FilesystemModel,
    pub cwd: &'a str,
    pub previous_cwd: Option<&'a str>,
    pub history: &'a [CommandRecord],
    pub now: DateTime<Utc>,
}

impl LocalShell<'_> {
    /// Resolve locally, or return `None` to hand the command to the engine.
    pub fn resolve(
        &mut self,
        raw_input: &str,
        command: &ParsedCommand,
        category: Category,
    ) -> Option<LocalResolution> {
        let resolution = match category {
            Category::Navigation => self.cd(command),
            Category::WorkingDirectory => LocalResolution::output(format!("{}\n", self.cwd)),
            Category::Listing => {
                LocalResolution::output(listing::ls(self.fs, command, self.cwd, self.now))
            }
            Category::FileStat => {
                LocalResolution::output(listing::stat(self.fs, command, self.cwd, self.facts.uid()))
            }
            Category::FileCreate => self.create(command),
            Category::Echo => LocalResolution::output(self.echo(command)),
            Category::Help => LocalResolution::output(self.render(category, command)),
            Category::History => LocalResolution::output(self.history(raw_input)),
            Category::Hostname => LocalResolution::output(format!("{}\n", self.facts.hostname())),
            Category::PrivilegeEscalation => {
                if command.verb == "su" {
                    LocalResolution::output("Password: \nsu: Authentication failure\n")
                } else {
                    LocalResolution::output(self.render(category, command))
                }
            }
            Category::Builtin => LocalResolution::output(builtin(command)),
            Category::Exit => LocalResolution {
                output: "logout\n".to_string(),
                cwd: None,
                exit: true,
            },
            Category::FileRead | Category::AccountDatabase | Category::SecretRead => {
                return self.precheck_read(command);
            }
            Category::Whoami
            | Category::IdQuery
            | Category::SystemInfo
            | Category::Environment
            | Category::Unknown => return None,
        };
        Some(resolution)
    }

    fn vars<'v>(&'v self, command: &'v ParsedCommand, args: &'v str) -> [(&'v str, &'v str); 7] {
        [
            ("username", self.facts.username()),
            ("hostname", self.facts.hostname()),
            ("uid", self.facts.uid()),
            ("home", self.facts.home()),
            ("cwd", self.cwd),
            ("verb", command.verb.as_str()),
            ("args", args),
        ]
    }

    fn render(&self, category: Category, command: &ParsedCommand) -> String {
        let args = command.args.join(" ");
        render_template(&self.policy.entry(category).fallback, &self.vars(command, &args))
    }

    fn cd(&mut self, command: &ParsedCommand) -> LocalResolution {
        let operands = command.operands();
        if operands.len() > 1 {
            return LocalResolution::output("bash: cd: too many arguments\n");
        }
        let (target, announce) = match operands.first().copied() {
            None | Some("~") => (self.fs.home().to_string(), false),
            Some("-") => match self.previous_cwd {
                Some(prev) => (prev.to_string(), true),
                None => return LocalResolution::output("bash: cd: OLDPWD not set\n"),
            },
            Some(path) => (path.to_string(), false),
        };
        match self.fs.change_directory(&target, self.cwd) {
            Ok(cwd) => LocalResolution {
                output: if announce { format!("{cwd}\n") } else { String::new() },
                cwd: Some(cwd),
                exit: false,
            },
            Err(e) => LocalResolution::output(format!("bash: cd: {target}: {}\n", e.reason())),
        }
    }

    fn echo(&self, command: &ParsedCommand) -> String {
        let mut newline = true;
        let mut words = Vec::new();
        let mut options_done = false;
        for arg in &command.args {
            if !options_done && matches!(arg.as_str(), "-n" | "-e" | "-E" | "-ne" | "-en") {
                if arg.contains('n') {
                    newline = false;
                }
                continue;
            }
            options_done = true;
            words.push(self.expand(arg));
        }
        let mut out = words.join(" ");
        if newline {
            out.push('\n');
        }
        out
    }

    /// Expand `$VAR` and `${VAR}` against the session's environment.
    fn expand(&self, word: &str) -> String {
        let mut out = String::with_capacity(word.len());
        let mut chars = word.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }
            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            if braced && chars.peek() == Some(&'}') {
                chars.next();
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            out.push_str(&self.variable(&name));
        }
        out
    }

    fn variable(&self, name: &str) -> String {
        match name {
            "USER" | "LOGNAME" => self.facts.username().to_string(),
            "HOME" => self.facts.home().to_string(),
            "PWD" => self.cwd.to_string(),
            "OLDPWD" => self.previous_cwd.unwrap_or_default().to_string(),
            "HOSTNAME" => self.facts.hostname().to_string(),
            "SHELL" => self.policy.persona().shell.clone(),
            "UID" | "EUID" => self.facts.uid().to_string(),
            "PATH" => "/usr/local/bin:/usr/bin:/bin:/usr/local/games:/usr/games".to_string(),
            _ => String::new(),
        }
    }

    fn history(&self, raw_input: &str) -> String {
        self.history
            .iter()
            .map(|r| r.raw_input.as_str())
            .chain(std::iter::once(raw_input))
            .enumerate()
            .map(|(i, line)| format!("{:>5}  {line}\n", i + 1))
            .collect()
    }

    fn create(&mut self, command: &ParsedCommand) -> LocalResolution {
        let verb = command.verb.as_str();
        let operands = command.operands();
        if operands.is_empty() {
            return LocalResolution::output(format!(
                "{verb}: missing operand\nTry '{verb} --help' for more information.\n"
            ));
        }
        let parents = verb == "mkdir" && command.has_flag('p');
        let mut out = String::new();
        for operand in operands {
            let result = if verb == "mkdir" {
                self.mkdir(operand, parents)
            } else {
                self.touch(operand)
            };
            if let Err(reason) = result {
                let message = if verb == "mkdir" {
                    format!("mkdir: cannot create directory '{operand}': {reason}\n")
                } else {
                    format!("touch: cannot touch '{operand}': {reason}\n")
                };
                out.push_str(&message);
            }
        }
        LocalResolution::output(out)
    }

    fn touch(&mut self, operand: &str) -> Result<(), &'static str> {
        match self.fs.resolve(operand, self.cwd) {
            Ok(_) => Ok(()),
            Err(FsError::NotFound(_)) => {
                let abs = self.fs.normalize(operand, self.cwd);
                self.create_in_parent(&abs, NodeKind::File)
            }
            Err(e) => Err(e.reason()),
        }
    }

    fn mkdir(&mut self, operand: &str, parents: bool) -> Result<(), &'static str> {
        match self.fs.resolve(operand, self.cwd) {
            Ok(node) if parents && node.is_dir() => return Ok(()),
            Ok(_) => return Err("File exists"),
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e.reason()),
        }
        let abs = self.fs.normalize(operand, self.cwd);
        if !parents {
            return self.create_in_parent(&abs, NodeKind::Directory);
        }
        let mut prefix = String::new();
        for part in abs.split('/').filter(|p| !p.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            match self.fs.resolve(&prefix, "/") {
                Ok(node) if node.is_dir() => {}
                Ok(_) => return Err("Not a directory"),
                Err(FsError::NotFound(_)) => self.create_in_parent(&prefix, NodeKind::Directory)?,
                Err(e) => return Err(e.reason()),
            }
        }
        Ok(())
    }

    fn create_in_parent(&mut self, abs: &str, kind: NodeKind) -> Result<(), &'static str> {
        let parent = match abs.rsplit_once('/') {
            Some(("", _)) | None => "/",
            Some((dir, _)) => dir,
        };
        let dir = self.fs.resolve(parent, "/").map_err(|e| e.reason())?;
        if !dir.is_dir() {
            return Err("Not a directory");
        }
        if !self.fs.permits(&dir, Access::Write) {
            return Err("Permission denied");
        }
        self.fs.materialize_if_absent(abs, kind);
        Ok(())
    }

    /// Answer file reads the model can settle: missing, unreadable and
    /// session-created operands. Any other readable file goes to the engine.
    ///
    /// A compound line is answered here only when every reader fails or is
    /// empty and the rest of the pipeline just filters what it is fed.
    fn precheck_read(&mut self, command: &ParsedCommand) -> Option<LocalResolution> {
        if !command.compound {
            return match self.check_reads(command) {
                ReadCheck::Local(out) => Some(LocalResolution::output(out)),
                ReadCheck::NoFiles | ReadCheck::Readable => None,
            };
        }
        let mut out = String::new();
        let mut answered = false;
        for segment in command.commands() {
            match self.check_reads(segment) {
                ReadCheck::Readable => return None,
                ReadCheck::NoFiles if !STDIN_FILTERS.contains(&segment.verb.as_str()) => {
                    return None;
                }
                ReadCheck::NoFiles => {}
                ReadCheck::Local(text) => {
                    out.push_str(&text);
                    answered = true;
                }
            }
        }
        answered.then(|| LocalResolution::output(out))
    }

    fn check_reads(&mut self, command: &ParsedCommand) -> ReadCheck {
        let operands: Vec<&str> = if command.reads_files() {
            command.operands()
        } else {
            command
                .operands()
                .into_iter()
                .filter(|p| p.contains('/') || p.starts_with('~') || p.starts_with('.'))
                .collect()
        };
        // Substituted words are expanded by the shell, never opened as named
        let operands: Vec<&str> = operands
            .into_iter()
            .filter(|p| !p.contains("$(") && !p.contains('`'))
            .collect();
        if operands.is_empty() {
            return ReadCheck::NoFiles;
        }

        let verb = command.verb.as_str();
        let mut out = String::new();
        for operand in operands {
            match self.fs.resolve(operand, self.cwd) {
                Ok(node) if node.is_dir() => {
                    out.push_str(&read_error(verb, operand, "Is a directory"))
                }
                Ok(node) if !self.fs.permits(&node, Access::Read) => {
                    out.push_str(&read_error(verb, operand, "Permission denied"))
                }
                Ok(node) if self.fs.is_created(&node.path) => {}
                Ok(_) => return ReadCheck::Readable,
                Err(e) => out.push_str(&read_error(verb, operand, e.reason())),
            }
        }
        ReadCheck::Local(out)
    }
}

/// What the filesystem model knows about a command's file operands
enum ReadCheck {
    NoFiles,
    /// At least one operand has content only the generator can supply
    Readable,
    /// Every operand failed or is empty; the text is the shell's output
    Local(String),
}

fn read_error(verb: &str, operand: &str, reason: &str) -> String {
    match (verb, reason) {
        ("head" | "tail", "Is a directory") => {
            format!("{verb}: error reading '{operand}': Is a directory\n")
        }
        ("head" | "tail", _) => format!("{verb}: cannot open '{operand}' for reading: {reason}\n"),
        ("less", "Is a directory") => format!("{operand} is a directory\n"),
        ("less", _) => format!("{operand}: {reason}\n"),
        _ => format!("{verb}: {operand}: {reason}\n"),
    }
}

fn builtin(command: &ParsedCommand) -> String {
    match command.verb.as_str() {
        "clear" | "reset" => CLEAR_SCREEN.to_string(),
        "alias" if command.args.is_empty() => DEFAULT_ALIASES.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
