// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::policy::SensitivityPolicy;
use proptest::prelude::*;

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_710_408_413, 0).unwrap()
}

fn model(key: &str) -> FilesystemModel {
    let policy = SensitivityPolicy::builtin().unwrap();
    let skeleton = Arc::new(Skeleton::for_persona(policy.persona()));
    FilesystemModel::new(key, skeleton, policy.persona(), epoch())
}

#[yare::parameterized(
    absolute      = { "/var/log", "/", "/var/log" },
    relative      = { "log", "/var", "/var/log" },
    dot_dot       = { "../etc", "/var", "/etc" },
    above_root    = { "../../..", "/var", "/" },
    duplicate     = { "//usr///bin/", "/", "/usr/bin" },
    dot           = { "./.", "/tmp", "/tmp" },
    tilde         = { "~", "/", "/home/user" },
    tilde_child   = { "~/.ssh", "/etc", "/home/user/.ssh" },
    tilde_literal = { "a~b", "/tmp", "/tmp/a~b" },
)]
fn normalize_cases(path: &str, cwd: &str, expected: &str) {
    assert_eq!(normalize_path(path, cwd, "/home/user"), expected);
}

proptest! {
    #[test]
    fn normalize_is_absolute_and_idempotent(path in "[a-z./~]{0,24}", cwd in "/[a-z/]{0,12}") {
        let once = normalize_path(&path, &cwd, "/home/user");
        prop_assert!(once.starts_with('/'));
        prop_assert!(!once.contains("//"));
        prop_assert_eq!(normalize_path(&once, "/", "/home/user"), once.clone());
    }

    #[test]
    fn metadata_is_stable_within_a_session(idx in 0usize..40) {
        let mut fs = model("session-a");
        let paths: Vec<String> = fs.skeleton.entries.keys().cloned().collect();
        let path = &paths[idx % paths.len()];
        if let Ok(first) = fs.resolve(path, "/") {
            // Materialize siblings in between to make sure nothing is recomputed
            let _ = fs.resolve("/etc", "/");
            let _ = fs.materialize_if_absent("/tmp/dropper", NodeKind::File);
            let second = fs.resolve(path, "/").unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

#[test]
fn skeleton_contains_persona_home_and_ancestors() {
    let fs = model("k");
    for path in ["/", "/home", "/home/user", "/home/user/.bashrc", "/etc/passwd", "/var/log"] {
        assert!(fs.skeleton.contains(path), "missing {path}");
    }
}

#[test]
fn boot_images_follow_persona_kernel() {
    let policy = SensitivityPolicy::builtin().unwrap();
    let skeleton = Skeleton::for_persona(policy.persona());
    assert!(skeleton.contains("/boot/vmlinuz-4.19.0-21-amd64"));
    assert!(skeleton.contains("/boot/System.map-4.19.0-21-amd64"));

    let mut persona = policy.persona().clone();
    persona.kernel = Some("Linux server-dev-01 6.1.0-18-amd64 #1 SMP x86_64 GNU/Linux".into());
    let skeleton = Skeleton::for_persona(&persona);
    assert!(skeleton.contains("/boot/vmlinuz-6.1.0-18-amd64"));
    assert!(!skeleton.contains("/boot/vmlinuz-4.19.0-21-amd64"));

    persona.kernel = None;
    let skeleton = Skeleton::for_persona(&persona);
    assert!(skeleton.contains("/boot"));
    assert!(!skeleton.contains("/boot/vmlinuz-6.1.0-18-amd64"));
}

#[test]
fn created_files_are_tracked() {
    let mut fs = model("k");
    assert!(!fs.is_created("/tmp/new"));
    fs.materialize_if_absent("/tmp/new", NodeKind::File);
    assert!(fs.is_created("/tmp/new"));
    assert!(!fs.is_created("/etc/hosts"));
}

#[test]
fn resolve_missing_path_is_not_found() {
    let mut fs = model("k");
    assert_eq!(
        fs.resolve("/nope", "/"),
        Err(FsError::NotFound("/nope".to_string()))
    );
}

#[test]
fn resolve_through_file_is_not_a_directory() {
    let mut fs = model("k");
    assert_eq!(
        fs.resolve("/etc/passwd/x", "/"),
        Err(FsError::NotADirectory("/etc/passwd/x".to_string()))
    );
}

#[test]
fn same_path_same_metadata_across_calls() {
    let mut fs = model("k");
    let a = fs.resolve("/etc/passwd", "/").unwrap();
    let b = fs.resolve("passwd", "/etc").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.kind, NodeKind::File);
    assert_eq!(a.meta.owner, "root");
}

#[test]
fn different_sessions_fabricate_independently() {
    let mut a = model("session-a");
    let mut b = model("session-b");
    let differs = ["/etc/passwd", "/etc/hosts", "/var/log/dpkg.log", "/etc/motd"]
        .iter()
        .any(|p| a.resolve(p, "/").unwrap().meta != b.resolve(p, "/").unwrap().meta);
    assert!(differs);
}

#[test]
fn same_session_key_reproduces_metadata() {
    let mut a = model("session-a");
    let mut b = model("session-a");
    assert_eq!(
        a.resolve("/etc/hosts", "/").unwrap(),
        b.resolve("/etc/hosts", "/").unwrap()
    );
}

#[test]
fn home_is_owned_by_persona() {
    let mut fs = model("k");
    let home = fs.resolve("~", "/").unwrap();
    assert_eq!(home.meta.owner, "user");
    let bashrc = fs.resolve("~/.bashrc", "/").unwrap();
    assert_eq!(bashrc.meta.owner, "user");
    assert_eq!(bashrc.mode_string(), "-rw-r--r--");
}

#[test]
fn change_directory_cases() {
    let mut fs = model("k");
    assert_eq!(fs.change_directory("/var/log", "/").unwrap(), "/var/log");
    assert_eq!(fs.change_directory("..", "/var/log").unwrap(), "/var");
    assert_eq!(
        fs.change_directory("/etc/passwd", "/"),
        Err(FsError::NotADirectory("/etc/passwd".to_string()))
    );
    assert_eq!(
        fs.change_directory("/nope", "/"),
        Err(FsError::NotFound("/nope".to_string()))
    );
    assert_eq!(
        fs.change_directory("/root", "/"),
        Err(FsError::PermissionDenied("/root".to_string()))
    );
}

#[test]
fn root_only_paths_are_not_readable() {
    let mut fs = model("k");
    let shadow = fs.resolve("/etc/shadow", "/").unwrap();
    assert!(!fs.permits(&shadow, Access::Read));
    assert_eq!(shadow.mode_string(), "-rw-r-----");
    assert_eq!(
        fs.resolve("/root/.bashrc", "/"),
        Err(FsError::PermissionDenied("/root/.bashrc".to_string()))
    );
}

#[test]
fn special_mode_bits_render() {
    let mut fs = model("k");
    assert_eq!(fs.resolve("/tmp", "/").unwrap().mode_string(), "drwxrwxrwt");
    assert_eq!(fs.resolve("/usr/bin/sudo", "/").unwrap().mode_string(), "-rwsr-xr-x");
}

#[test]
fn list_returns_sorted_direct_children() {
    let mut fs = model("k");
    let home = fs.resolve("/home", "/").unwrap();
    let names: Vec<_> = fs
        .list(&home)
        .unwrap()
        .iter()
        .map(|n| n.name().to_string())
        .collect();
    assert_eq!(names, ["user"]);

    let root = fs.resolve("/", "/").unwrap();
    let names: Vec<_> = fs.list(&root).unwrap().iter().map(|n| n.name().to_string()).collect();
    assert!(names.contains(&"etc".to_string()));
    assert!(!names.iter().any(|n| n.contains('/')));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn list_denied_for_private_directory() {
    let mut fs = model("k");
    // Metadata for /root is still visible; its contents are not
    let root_home = fs.resolve("/root", "/").unwrap();
    assert_eq!(
        fs.list(&root_home),
        Err(FsError::PermissionDenied("/root".to_string()))
    );
}

#[test]
fn materialize_if_absent_creates_once() {
    let mut fs = model("k");
    let created = fs.materialize_if_absent("/tmp/x.sh", NodeKind::File);
    assert_eq!(created.meta.owner, "user");
    assert_eq!(created.meta.size, 0);
    assert_eq!(created.meta.modified, epoch());

    let again = fs.materialize_if_absent("/tmp/x.sh", NodeKind::Directory);
    assert_eq!(again, created);

    let tmp = fs.resolve("/tmp", "/").unwrap();
    let names: Vec<_> = fs.list(&tmp).unwrap().iter().map(|n| n.name().to_string()).collect();
    assert_eq!(names, ["x.sh"]);
}

#[test]
fn materialize_existing_path_keeps_skeleton_kind() {
    let mut fs = model("k");
    let node = fs.materialize_if_absent("/etc", NodeKind::File);
    assert!(node.is_dir());
}

#[test]
fn directory_link_count_reflects_subdirectories() {
    let mut fs = model("k");
    let ssh_dir = fs.resolve("/home/user/.ssh", "/").unwrap();
    assert_eq!(ssh_dir.meta.links, 2);
    let home = fs.resolve("/home/user", "/").unwrap();
    assert_eq!(home.meta.links, 3);
}
