// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sensitivity policy: static, loaded once at startup, read-only afterwards.
//!
//! The policy maps every [`Category`] to a tier, an optional canonical shape
//! used by the validator, and a canned fallback. It also carries the persona
//! (hostname, account, banner) the shell pretends to be.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{Category, SensitivityTier};

const BUILTIN_POLICY: &str = include_str!("default_policy.toml");

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown category in policy: {0}")]
    UnknownCategory(String),
    #[error("policy has no entry for category {0}")]
    MissingCategory(Category),
    #[error("sensitive category {0} needs a canonical shape")]
    MissingShape(Category),
    #[error("category {0} reaches the generator but has no fallback")]
    EmptyFallback(Category),
    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid persona: {0}")]
    InvalidPersona(String),
}

/// Expected structure of a sensitive command's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalShape {
    /// A single low-privilege login name
    Username,
    /// `uid=N(name) gid=N(name) groups=...`
    IdLine,
    /// `uname` output, consistent with the committed kernel release
    KernelLine,
    /// passwd(5) body containing the committed account
    PasswdFile,
    /// `KEY=value` lines consistent with the session
    EnvironmentBlock,
    /// Credential-bearing file content without placeholders
    SecretFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Persona {
    pub hostname: String,
    pub username: String,
    #[serde(default = "default_uid")]
    pub uid: u32,
    pub home: String,
    #[serde(default = "default_initial_cwd")]
    pub initial_cwd: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Full `uname -a` line; left to the generator when absent
    #[serde(default)]
    pub kernel: Option<String>,
    pub banner: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

fn default_uid() -> u32 {
    1000
}

fn default_initial_cwd() -> String {
    "/".to_string()
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_prompt() -> String {
    "{username}@{hostname}:{cwd}$ ".to_string()
}

impl Persona {
    /// Kernel release (third field of `uname -a`)
    pub fn kernel_release(&self) -> Option<&str> {
        self.kernel.as_deref()?.split_whitespace().nth(2)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.username.is_empty() || self.hostname.is_empty() {
            return Err(PolicyError::InvalidPersona(
                "username and hostname are required".to_string(),
            ));
        }
        if self.username == "root" || self.uid == 0 {
            return Err(PolicyError::InvalidPersona(
                "persona must be a low-privilege account".to_string(),
            ));
        }
        if let Some(kernel) = &self.kernel {
            let fields: Vec<&str> = kernel.split_whitespace().collect();
            if fields.len() < 3 || fields[0] != "Linux" || fields[1] != self.hostname {
                return Err(PolicyError::InvalidPersona(
                    "kernel must be a `uname -a` line naming the persona's hostname".to_string(),
                ));
            }
        }
        for (field, path) in [("home", &self.home), ("initial_cwd", &self.initial_cwd)] {
            if !path.starts_with('/') {
                return Err(PolicyError::InvalidPersona(format!(
                    "{field} must be absolute: {path}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEntry {
    pub tier: SensitivityTier,
    pub shape: Option<CanonicalShape>,
    pub fallback: String,
}

#[derive(Deserialize)]
struct RawPolicy {
    persona: Persona,
    #[serde(default)]
    disclosure_markers: Vec<String>,
    #[serde(default)]
    account_paths: Vec<String>,
    #[serde(default)]
    secret_paths: Vec<String>,
    #[serde(default = "default_installed_fallback")]
    installed_fallback: String,
    categories: BTreeMap<String, RawEntry>,
}

fn default_installed_fallback() -> String {
    "Segmentation fault (core dumped)\n".to_string()
}

#[derive(Deserialize)]
struct RawEntry {
    tier: SensitivityTier,
    #[serde(default)]
    shape: Option<CanonicalShape>,
    #[serde(default)]
    fallback: String,
}

#[derive(Debug)]
pub struct SensitivityPolicy {
    persona: Persona,
    /// Indexed by `Category as usize`, complete after validation
    entries: Vec<PolicyEntry>,
    disclosure_markers: Vec<String>,
    account_paths: Vec<Regex>,
    secret_paths: Vec<Regex>,
    installed_fallback: String,
}

impl SensitivityPolicy {
    /// Policy embedded in the binary.
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::from_toml_str(BUILTIN_POLICY)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PolicyError> {
        let raw: RawPolicy = toml::from_str(content)?;
        raw.persona.validate()?;
        if raw.installed_fallback.trim().is_empty() {
            return Err(PolicyError::EmptyFallback(Category::Unknown));
        }

        let mut by_category = BTreeMap::new();
        for (name, entry) in raw.categories {
            let category = Category::ALL
                .into_iter()
                .find(|c| c.as_str() == name)
                .ok_or_else(|| PolicyError::UnknownCategory(name.clone()))?;
            by_category.insert(category, entry);
        }

        let mut entries = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let raw = by_category
                .remove(&category)
                .ok_or(PolicyError::MissingCategory(category))?;
            let reaches_generator = !category.is_local();
            if reaches_generator
                && raw.tier == SensitivityTier::Sensitive
                && raw.shape.is_none()
            {
                return Err(PolicyError::MissingShape(category));
            }
            if reaches_generator && raw.fallback.trim().is_empty() {
                return Err(PolicyError::EmptyFallback(category));
            }
            entries.push(PolicyEntry {
                tier: raw.tier,
                shape: raw.shape,
                fallback: raw.fallback,
            });
        }

        Ok(Self {
            persona: raw.persona,
            entries,
            disclosure_markers: raw
                .disclosure_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            account_paths: compile_patterns(&raw.account_paths)?,
            secret_paths: compile_patterns(&raw.secret_paths)?,
            installed_fallback: raw.installed_fallback,
        })
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn entry(&self, category: Category) -> &PolicyEntry {
        &self.entries[category as usize]
    }

    pub fn tier(&self, category: Category) -> SensitivityTier {
        self.entry(category).tier
    }

    pub fn shape(&self, category: Category) -> Option<CanonicalShape> {
        self.entry(category).shape
    }

    /// Lowercased phrases that betray a generated response
    pub fn disclosure_markers(&self) -> &[String] {
        &self.disclosure_markers
    }

    /// Fallback for commands the host has installed, and for pipelines,
    /// where `command not found` would contradict earlier answers
    pub fn installed_fallback(&self) -> &str {
        &self.installed_fallback
    }

    pub fn is_account_path(&self, path: &str) -> bool {
        self.account_paths.iter().any(|re| re.is_match(path))
    }

    pub fn is_secret_path(&self, path: &str) -> bool {
        self.secret_paths.iter().any(|re| re.is_match(path))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, PolicyError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| PolicyError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as-is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
