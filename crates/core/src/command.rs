// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command classification types and the per-command audit record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fine-grained command category.
///
/// The sensitivity policy maps each category to a tier, so categories are
/// split wherever two commands need different canonical shapes (e.g.
/// `whoami` and `cat /etc/passwd` are both identity disclosures but validate
/// differently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Navigation,
    WorkingDirectory,
    Listing,
    FileStat,
    FileRead,
    FileCreate,
    Echo,
    Help,
    History,
    Hostname,
    Whoami,
    IdQuery,
    SystemInfo,
    AccountDatabase,
    SecretRead,
    Environment,
    PrivilegeEscalation,
    Builtin,
    Exit,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 20] = [
        Category::Navigation,
        Category::WorkingDirectory,
        Category::Listing,
        Category::FileStat,
        Category::FileRead,
        Category::FileCreate,
        Category::Echo,
        Category::Help,
        Category::History,
        Category::Hostname,
        Category::Whoami,
        Category::IdQuery,
        Category::SystemInfo,
        Category::AccountDatabase,
        Category::SecretRead,
        Category::Environment,
        Category::PrivilegeEscalation,
        Category::Builtin,
        Category::Exit,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Navigation => "navigation",
            Category::WorkingDirectory => "working_directory",
            Category::Listing => "listing",
            Category::FileStat => "file_stat",
            Category::FileRead => "file_read",
            Category::FileCreate => "file_create",
            Category::Echo => "echo",
            Category::Help => "help",
            Category::History => "history",
            Category::Hostname => "hostname",
            Category::Whoami => "whoami",
            Category::IdQuery => "id_query",
            Category::SystemInfo => "system_info",
            Category::AccountDatabase => "account_database",
            Category::SecretRead => "secret_read",
            Category::Environment => "environment",
            Category::PrivilegeEscalation => "privilege_escalation",
            Category::Builtin => "builtin",
            Category::Exit => "exit",
            Category::Unknown => "unknown",
        }
    }

    /// Whether the category is answered from session state without the generator.
    pub fn is_local(&self) -> bool {
        !matches!(
            self,
            Category::FileRead
                | Category::Whoami
                | Category::IdQuery
                | Category::SystemInfo
                | Category::AccountDatabase
                | Category::SecretRead
                | Category::Environment
                | Category::Unknown
        )
    }

    /// Whether an answer, once given, is pinned for the rest of the session.
    pub fn is_pinned(&self) -> bool {
        matches!(
            self,
            Category::FileRead
                | Category::IdQuery
                | Category::SystemInfo
                | Category::AccountDatabase
                | Category::SecretRead
                | Category::Environment
        )
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityTier {
    Trivial,
    Standard,
    Sensitive,
}

/// Result of classifying one input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub tier: SensitivityTier,
    /// Input could not be attributed to a single verb (pipelines, substitutions)
    /// and was routed to the generator as `Unknown`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ambiguous: bool,
}

/// How a command's final output was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    LocalDeterministic,
    GeneratorAccepted,
    GeneratorRepaired,
    FallbackCanned,
}

impl ResolutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPath::LocalDeterministic => "local_deterministic",
            ResolutionPath::GeneratorAccepted => "generator_accepted",
            ResolutionPath::GeneratorRepaired => "generator_repaired",
            ResolutionPath::FallbackCanned => "fallback_canned",
        }
    }
}

/// One processed command. Immutable once appended to a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub raw_input: String,
    pub classification: Classification,
    pub resolved_output: String,
    pub resolution_path: ResolutionPath,
    /// Generator calls made for this command (0 for local resolutions)
    pub attempt_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
