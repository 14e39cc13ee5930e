// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-local cache of committed facts.
//!
//! Once a value has been disclosed to the attacker it is pinned here and every
//! later response that references it must reuse it verbatim.

use std::collections::HashMap;

use crate::policy::Persona;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactKey {
    Username,
    Hostname,
    Uid,
    Home,
    KernelRelease,
    /// Content shown by `cat <path>`, keyed by absolute path
    FileContent(String),
    /// Exact output of a pinned command, keyed by its normalised form
    Output(String),
}

#[derive(Debug, Clone, Default)]
pub struct CommittedFacts {
    facts: HashMap<FactKey, String>,
}

impl CommittedFacts {
    /// Facts disclosed by the banner and shell prompt before any command runs.
    pub fn seeded(persona: &Persona) -> Self {
        let mut facts = Self::default();
        facts.commit(FactKey::Username, persona.username.clone());
        facts.commit(FactKey::Hostname, persona.hostname.clone());
        facts.commit(FactKey::Uid, persona.uid.to_string());
        facts.commit(FactKey::Home, persona.home.clone());
        if let Some(release) = persona.kernel_release() {
            facts.commit(FactKey::KernelRelease, release.to_string());
        }
        facts
    }

    pub fn get(&self, key: &FactKey) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Commit a value unless one is already pinned. Returns the pinned value.
    pub fn commit(&mut self, key: FactKey, value: impl Into<String>) -> &str {
        self.facts.entry(key).or_insert_with(|| value.into())
    }

    pub fn username(&self) -> &str {
        self.get(&FactKey::Username).unwrap_or_default()
    }

    pub fn hostname(&self) -> &str {
        self.get(&FactKey::Hostname).unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.get(&FactKey::Uid).unwrap_or_default()
    }

    pub fn home(&self) -> &str {
        self.get(&FactKey::Home).unwrap_or("/")
    }
}

#[cfg(test)]
#[path = "facts_tests.rs"]
mod tests;
