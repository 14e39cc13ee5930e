// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem illusion model.
//!
//! A shared, read-only [`Skeleton`] lists which paths exist. Each session owns a
//! [`FilesystemModel`] that materializes metadata lazily: the first time a path
//! is looked at, owner/mode/size/mtime are derived from a SHA-256 of the
//! session key and the path, then cached. Repeated inspection of the same path
//! in the same session therefore always returns identical metadata.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::policy::Persona;

/// Spread of fabricated modification times before the session epoch
const MTIME_SPREAD_SECS: u64 = 400 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("{0}: No such file or directory")]
    NotFound(String),
    #[error("{0}: Not a directory")]
    NotADirectory(String),
    #[error("{0}: Permission denied")]
    PermissionDenied(String),
}

impl FsError {
    /// Bash-style reason text without the path
    pub fn reason(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "No such file or directory",
            FsError::NotADirectory(_) => "Not a directory",
            FsError::PermissionDenied(_) => "Permission denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub owner: String,
    pub group: String,
    /// Permission bits including setuid/sticky (e.g. `0o1777`)
    pub mode: u32,
    pub size: u64,
    pub links: u32,
    pub inode: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNode {
    pub path: String,
    pub kind: NodeKind,
    pub meta: NodeMetadata,
}

impl FsNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Final path component (`/` for the root)
    pub fn name(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, name)) if !name.is_empty() => name,
            _ => "/",
        }
    }

    /// `ls -l` style mode string, e.g. `drwxr-xr-x`
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir() { 'd' } else { '-' });
        let bits = self.meta.mode;
        let triples = [(6, 0o4000, 's'), (3, 0o2000, 's'), (0, 0o1000, 't')];
        for (shift, special, special_char) in triples {
            let triple = (bits >> shift) & 0o7;
            out.push(if triple & 0o4 != 0 { 'r' } else { '-' });
            out.push(if triple & 0o2 != 0 { 'w' } else { '-' });
            let exec = triple & 0o1 != 0;
            out.push(match (bits & special != 0, exec) {
                (true, true) => special_char,
                (true, false) => special_char.to_ascii_uppercase(),
                (false, true) => 'x',
                (false, false) => '-',
            });
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    fn bit(self) -> u32 {
        match self {
            Access::Read => 0o4,
            Access::Write => 0o2,
            Access::Execute => 0o1,
        }
    }
}

/// Static shape hints for a path in the skeleton
#[derive(Debug, Clone, PartialEq, Eq)]
struct SkeletonEntry {
    kind: NodeKind,
    owner: Option<String>,
    group: Option<String>,
    mode: Option<u32>,
}

impl SkeletonEntry {
    fn dir() -> Self {
        Self {
            kind: NodeKind::Directory,
            owner: None,
            group: None,
            mode: None,
        }
    }

    fn file() -> Self {
        Self {
            kind: NodeKind::File,
            ..Self::dir()
        }
    }

    fn owned(mut self, owner: &str, group: &str, mode: u32) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self.mode = Some(mode);
        self
    }
}

/// Session-independent directory tree, shared read-only by all sessions.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    entries: BTreeMap<String, SkeletonEntry>,
}

const STANDARD_DIRS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/etc/apt", "/etc/cron.d", "/etc/default", "/etc/init.d",
    "/etc/network", "/etc/ssh", "/etc/systemd", "/home", "/lib", "/lib64", "/media", "/mnt",
    "/opt", "/proc", "/run", "/sbin", "/srv", "/sys", "/usr", "/usr/bin", "/usr/include",
    "/usr/lib", "/usr/local", "/usr/local/bin", "/usr/local/lib", "/usr/sbin", "/usr/share",
    "/usr/src", "/var", "/var/backups", "/var/cache", "/var/lib", "/var/local", "/var/log",
    "/var/log/apt", "/var/mail", "/var/opt", "/var/spool", "/var/www", "/var/www/html",
];

const STANDARD_FILES: &[&str] = &[
    "/bin/bash", "/bin/cat", "/bin/cp", "/bin/date", "/bin/grep", "/bin/ls", "/bin/mkdir",
    "/bin/mv", "/bin/ps", "/bin/rm", "/bin/sh", "/etc/adduser.conf",
    "/etc/apt/sources.list", "/etc/bash.bashrc", "/etc/crontab", "/etc/debian_version",
    "/etc/fstab", "/etc/group", "/etc/host.conf", "/etc/hostname", "/etc/hosts", "/etc/issue",
    "/etc/issue.net", "/etc/login.defs", "/etc/motd", "/etc/network/interfaces",
    "/etc/os-release", "/etc/passwd", "/etc/profile", "/etc/resolv.conf", "/etc/services",
    "/etc/ssh/ssh_config", "/etc/ssh/sshd_config", "/usr/bin/curl", "/usr/bin/id",
    "/usr/bin/perl", "/usr/bin/python3", "/usr/bin/sudo", "/usr/bin/vim", "/usr/bin/wget",
    "/usr/bin/whoami", "/usr/sbin/sshd", "/var/log/alternatives.log", "/var/log/apt/history.log",
    "/var/log/dpkg.log", "/var/log/lastlog", "/var/log/wtmp", "/var/www/html/index.html",
];

impl Skeleton {
    /// Plausible Debian layout with the persona's home directory.
    pub fn for_persona(persona: &Persona) -> Self {
        let mut skeleton = Self::default();
        skeleton.insert("/", SkeletonEntry::dir());
        for dir in STANDARD_DIRS {
            skeleton.insert(dir, SkeletonEntry::dir());
        }
        for file in STANDARD_FILES {
            skeleton.insert(file, SkeletonEntry::file());
        }

        // Kernel images must agree with what `uname -r` reports
        if let Some(release) = persona.kernel_release() {
            for prefix in ["config", "initrd.img", "System.map", "vmlinuz"] {
                skeleton.insert(&format!("/boot/{prefix}-{release}"), SkeletonEntry::file());
            }
        }

        skeleton.insert("/tmp", SkeletonEntry::dir().owned("root", "root", 0o1777));
        skeleton.insert("/var/tmp", SkeletonEntry::dir().owned("root", "root", 0o1777));
        skeleton.insert("/root", SkeletonEntry::dir().owned("root", "root", 0o700));
        skeleton.insert("/root/.bashrc", SkeletonEntry::file().owned("root", "root", 0o644));
        skeleton.insert("/root/.ssh", SkeletonEntry::dir().owned("root", "root", 0o700));
        skeleton.insert("/etc/shadow", SkeletonEntry::file().owned("root", "shadow", 0o640));
        skeleton.insert("/etc/gshadow", SkeletonEntry::file().owned("root", "shadow", 0o640));
        skeleton.insert("/etc/sudoers", SkeletonEntry::file().owned("root", "root", 0o440));
        skeleton.insert(
            "/etc/ssh/ssh_host_rsa_key",
            SkeletonEntry::file().owned("root", "root", 0o600),
        );
        skeleton.insert("/usr/bin/sudo", SkeletonEntry::file().owned("root", "root", 0o4755));
        skeleton.insert("/var/log/auth.log", SkeletonEntry::file().owned("syslog", "adm", 0o640));
        skeleton.insert("/var/log/syslog", SkeletonEntry::file().owned("syslog", "adm", 0o640));
        skeleton.insert("/var/log/kern.log", SkeletonEntry::file().owned("syslog", "adm", 0o640));

        let user = persona.username.as_str();
        let home = normalize_path(&persona.home, "/", "/");
        skeleton.insert(&home, SkeletonEntry::dir().owned(user, user, 0o755));
        for (name, mode) in [(".bashrc", 0o644), (".profile", 0o644), (".bash_logout", 0o644)] {
            skeleton.insert(
                &join(&home, name),
                SkeletonEntry::file().owned(user, user, mode),
            );
        }
        skeleton.insert(
            &join(&home, ".bash_history"),
            SkeletonEntry::file().owned(user, user, 0o600),
        );
        skeleton.insert(&join(&home, ".ssh"), SkeletonEntry::dir().owned(user, user, 0o700));
        skeleton.insert(
            &join(&home, ".ssh/authorized_keys"),
            SkeletonEntry::file().owned(user, user, 0o600),
        );
        skeleton
    }

    /// Insert an entry, creating missing ancestors as plain directories.
    fn insert(&mut self, path: &str, entry: SkeletonEntry) {
        let mut ancestor = parent(path);
        while let Some(dir) = ancestor {
            self.entries
                .entry(dir.to_string())
                .or_insert_with(SkeletonEntry::dir);
            ancestor = parent(dir);
        }
        self.entries.insert(path.to_string(), entry);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    fn get(&self, path: &str) -> Option<&SkeletonEntry> {
        self.entries.get(path)
    }

    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.entries
            .range(prefix.clone()..)
            .map(|(path, _)| path.as_str())
            .take_while(move |path| path.starts_with(&prefix))
            .filter(move |path| parent(path) == Some(dir))
    }
}

/// One session's view of the filesystem
#[derive(Debug, Clone)]
pub struct FilesystemModel {
    session_key: String,
    skeleton: Arc<Skeleton>,
    /// Paths created during this session (`touch`, `mkdir`)
    created: BTreeMap<String, SkeletonEntry>,
    nodes: HashMap<String, FsNode>,
    username: String,
    home: String,
    epoch: DateTime<Utc>,
}

impl FilesystemModel {
    pub fn new(
        session_key: impl Into<String>,
        skeleton: Arc<Skeleton>,
        persona: &Persona,
        epoch: DateTime<Utc>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            skeleton,
            created: BTreeMap::new(),
            nodes: HashMap::new(),
            username: persona.username.clone(),
            home: normalize_path(&persona.home, "/", "/"),
            epoch,
        }
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    /// Account the session runs as; owns everything it creates
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Absolute, normalised form of `path` relative to `cwd`
    pub fn normalize(&self, path: &str, cwd: &str) -> String {
        normalize_path(path, cwd, &self.home)
    }

    fn entry(&self, path: &str) -> Option<&SkeletonEntry> {
        self.created.get(path).or_else(|| self.skeleton.get(path))
    }

    /// Look up a path. Materializes (and pins) its metadata on first access.
    pub fn resolve(&mut self, path: &str, cwd: &str) -> Result<FsNode, FsError> {
        let abs = self.normalize(path, cwd);
        // Every ancestor must be a directory the persona may traverse
        let mut ancestors = Vec::new();
        let mut ancestor = parent(&abs);
        while let Some(dir) = ancestor {
            ancestors.push(dir.to_string());
            ancestor = parent(dir);
        }
        for dir in ancestors.iter().rev() {
            match self.entry(dir).map(|e| e.kind) {
                None => return Err(FsError::NotFound(path.to_string())),
                Some(NodeKind::File) => return Err(FsError::NotADirectory(path.to_string())),
                Some(NodeKind::Directory) => {
                    let node = self.materialize(dir, NodeKind::Directory);
                    if !self.permits(&node, Access::Execute) {
                        return Err(FsError::PermissionDenied(path.to_string()));
                    }
                }
            }
        }
        let kind = self
            .entry(&abs)
            .map(|e| e.kind)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Ok(self.materialize(&abs, kind))
    }

    /// Whether `abs` was created by this session. Such files are known to
    /// be empty.
    pub fn is_created(&self, abs: &str) -> bool {
        self.created.contains_key(abs)
    }

    /// Return the node at `abs`, creating it for this session if absent.
    pub fn materialize_if_absent(&mut self, abs: &str, kind: NodeKind) -> FsNode {
        if self.entry(abs).is_none() {
            let mode = match kind {
                NodeKind::Directory => 0o755,
                NodeKind::File => 0o644,
            };
            let user = self.username.clone();
            self.created.insert(
                abs.to_string(),
                SkeletonEntry {
                    kind,
                    owner: Some(user.clone()),
                    group: Some(user),
                    mode: Some(mode),
                },
            );
        }
        let kind = self.entry(abs).map(|e| e.kind).unwrap_or(kind);
        self.materialize(abs, kind)
    }

    fn materialize(&mut self, abs: &str, kind: NodeKind) -> FsNode {
        if let Some(node) = self.nodes.get(abs) {
            return node.clone();
        }
        let node = FsNode {
            path: abs.to_string(),
            kind,
            meta: self.derive_metadata(abs, kind),
        };
        self.nodes.insert(abs.to_string(), node.clone());
        node
    }

    fn derive_metadata(&self, abs: &str, kind: NodeKind) -> NodeMetadata {
        let mut hasher = Sha256::new();
        hasher.update(self.session_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(abs.as_bytes());
        let digest = hasher.finalize();
        let word = |i: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[i * 8..i * 8 + 8]);
            u64::from_le_bytes(bytes)
        };

        let hints = self.entry(abs).cloned();
        let created = self.created.contains_key(abs);
        let in_home = abs == self.home || abs.starts_with(&format!("{}/", self.home));
        let default_owner = if in_home { self.username.clone() } else { "root".to_string() };
        let owner = hints
            .as_ref()
            .and_then(|h| h.owner.clone())
            .unwrap_or(default_owner);
        let group = hints
            .as_ref()
            .and_then(|h| h.group.clone())
            .unwrap_or_else(|| owner.clone());
        let executable = abs.starts_with("/bin/")
            || abs.starts_with("/sbin/")
            || abs.starts_with("/usr/bin/")
            || abs.starts_with("/usr/sbin/")
            || abs.starts_with("/usr/local/bin/");
        let mode = hints.as_ref().and_then(|h| h.mode).unwrap_or(match kind {
            NodeKind::Directory => 0o755,
            NodeKind::File if executable => 0o755,
            NodeKind::File => 0o644,
        });

        let (size, links) = match kind {
            NodeKind::Directory => {
                let subdirs = self
                    .child_paths(abs)
                    .iter()
                    .filter(|p| matches!(self.entry(p), Some(e) if e.kind == NodeKind::Directory))
                    .count();
                (4096, 2 + subdirs as u32)
            }
            NodeKind::File if created => (0, 1),
            NodeKind::File if executable => (40_000 + word(1) % 1_200_000, 1),
            NodeKind::File => (64 + word(1) % 24_000, 1),
        };

        let modified = if created {
            self.epoch
        } else {
            self.epoch - Duration::seconds((word(2) % MTIME_SPREAD_SECS) as i64)
        };

        NodeMetadata {
            owner,
            group,
            mode,
            size,
            links,
            inode: 131_072 + word(3) % 4_000_000,
            modified,
        }
    }

    fn child_paths(&self, dir: &str) -> Vec<String> {
        let mut children: Vec<String> = self.skeleton.children(dir).map(str::to_string).collect();
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        for path in self.created.keys() {
            if path.starts_with(&prefix) && parent(path) == Some(dir) && !children.contains(path) {
                children.push(path.clone());
            }
        }
        children.sort();
        children
    }

    /// Materialized children of a directory, sorted by name.
    pub fn list(&mut self, dir: &FsNode) -> Result<Vec<FsNode>, FsError> {
        if !dir.is_dir() {
            return Err(FsError::NotADirectory(dir.path.clone()));
        }
        if !self.permits(dir, Access::Read) {
            return Err(FsError::PermissionDenied(dir.path.clone()));
        }
        let paths = self.child_paths(&dir.path);
        let mut nodes = Vec::with_capacity(paths.len());
        for path in paths {
            let kind = self.entry(&path).map(|e| e.kind).unwrap_or(NodeKind::File);
            nodes.push(self.materialize(&path, kind));
        }
        Ok(nodes)
    }

    /// Validate a `cd` target and return the new absolute working directory.
    pub fn change_directory(&mut self, path: &str, cwd: &str) -> Result<String, FsError> {
        let node = self.resolve(path, cwd)?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if !self.permits(&node, Access::Execute) {
            return Err(FsError::PermissionDenied(path.to_string()));
        }
        Ok(node.path)
    }

    /// Unix permission check for the persona's account.
    pub fn permits(&self, node: &FsNode, access: Access) -> bool {
        let mode = node.meta.mode;
        let bits = if node.meta.owner == self.username {
            (mode >> 6) & 0o7
        } else if node.meta.group == self.username {
            (mode >> 3) & 0o7
        } else {
            mode & 0o7
        };
        bits & access.bit() != 0
    }
}

/// POSIX path normalisation: resolves `.`/`..`, collapses slashes, expands `~`.
/// Never climbs above `/`.
pub fn normalize_path(path: &str, cwd: &str, home: &str) -> String {
    let expanded = if path == "~" {
        home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{cwd}/{path}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in expanded.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;
