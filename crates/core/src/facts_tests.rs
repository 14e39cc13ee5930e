// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::policy::SensitivityPolicy;

#[test]
fn first_commit_wins() {
    let mut facts = CommittedFacts::default();
    assert_eq!(facts.commit(FactKey::KernelRelease, "5.10.0-28-amd64"), "5.10.0-28-amd64");
    assert_eq!(facts.commit(FactKey::KernelRelease, "6.1.0-9-amd64"), "5.10.0-28-amd64");
    assert_eq!(facts.get(&FactKey::KernelRelease), Some("5.10.0-28-amd64"));
}

#[test]
fn output_keys_are_independent() {
    let mut facts = CommittedFacts::default();
    facts.commit(FactKey::Output("cat /etc/motd".into()), "welcome\n");
    assert_eq!(facts.get(&FactKey::Output("cat /etc/motd".into())), Some("welcome\n"));
    assert_eq!(facts.get(&FactKey::Output("cat /etc/issue".into())), None);
}

#[test]
fn seeded_from_builtin_persona() {
    let policy = SensitivityPolicy::builtin().unwrap();
    let facts = CommittedFacts::seeded(policy.persona());
    assert_eq!(facts.username(), "user");
    assert_eq!(facts.hostname(), "server-dev-01");
    assert_eq!(facts.uid(), "1000");
    assert_eq!(facts.home(), "/home/user");
    assert_eq!(facts.get(&FactKey::KernelRelease), Some("4.19.0-21-amd64"));
}
