// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ls` and `stat` rendering over materialized filesystem nodes

use chrono::{DateTime, Duration, Utc};
use mirage_core::{FilesystemModel, FsError, FsNode, ParsedCommand};

/// Terminal width assumed for column layout
const TERM_WIDTH: usize = 80;

/// Roughly six months: older mtimes show the year instead of the time
const RECENT_SECS: i64 = 182 * 24 * 60 * 60;

/// Numeric id shown for an account or group name
pub fn account_id(name: &str, username: &str, uid: &str) -> String {
    if name == username {
        return uid.to_string();
    }
    match name {
        "root" => "0",
        "adm" => "4",
        "shadow" => "42",
        "syslog" => "104",
        _ => "65534",
    }
    .to_string()
}

#[derive(Debug, Clone, Copy, Default)]
struct LsFlags {
    long: bool,
    all: bool,
    almost_all: bool,
    directory: bool,
    one_per_line: bool,
}

impl LsFlags {
    fn parse(command: &ParsedCommand) -> Self {
        let mut flags = match command.verb.as_str() {
            "ll" => LsFlags {
                long: true,
                all: true,
                ..Default::default()
            },
            "la" => LsFlags {
                almost_all: true,
                ..Default::default()
            },
            _ => LsFlags::default(),
        };
        for flag in command.short_flags() {
            match flag {
                'l' => flags.long = true,
                'a' => flags.all = true,
                'A' => flags.almost_all = true,
                'd' => flags.directory = true,
                '1' => flags.one_per_line = true,
                _ => {}
            }
        }
        flags
    }
}

/// One row of output: the node plus the name to display for it
struct Entry {
    name: String,
    node: FsNode,
}

pub fn ls(
    fs: &mut FilesystemModel,
    command: &ParsedCommand,
    cwd: &str,
    now: DateTime<Utc>,
) -> String {
    let flags = LsFlags::parse(command);
    let mut operands: Vec<String> = command.operands().iter().map(|s| s.to_string()).collect();
    let explicit = !operands.is_empty();
    if !explicit {
        operands.push(".".to_string());
    }
    operands.sort();

    let mut errors = String::new();
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for operand in &operands {
        match fs.resolve(operand, cwd) {
            Ok(node) if node.is_dir() && !flags.directory => dirs.push((operand.clone(), node)),
            Ok(node) => files.push(Entry {
                name: operand.clone(),
                node,
            }),
            Err(e) => errors.push_str(&format!("ls: cannot access '{operand}': {}\n", e.reason())),
        }
    }

    let mut out = errors;
    if !files.is_empty() {
        out.push_str(&render_entries(&files, flags, now, false));
    }
    let headers = operands.len() > 1;
    for (i, (operand, dir)) in dirs.iter().enumerate() {
        if headers {
            if i > 0 || !files.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("{operand}:\n"));
        }
        match directory_entries(fs, dir, flags, cwd) {
            Ok(entries) => out.push_str(&render_entries(&entries, flags, now, true)),
            Err(e) => out.push_str(&format!(
                "ls: cannot open directory '{operand}': {}\n",
                e.reason()
            )),
        }
    }
    out
}

fn directory_entries(
    fs: &mut FilesystemModel,
    dir: &FsNode,
    flags: LsFlags,
    cwd: &str,
) -> Result<Vec<Entry>, FsError> {
    let children = fs.list(dir)?;
    let mut entries = Vec::with_capacity(children.len() + 2);
    if flags.all {
        entries.push(Entry {
            name: ".".to_string(),
            node: dir.clone(),
        });
        let parent = fs.resolve(&format!("{}/..", dir.path), cwd).unwrap_or_else(|_| dir.clone());
        entries.push(Entry {
            name: "..".to_string(),
            node: parent,
        });
    }
    let show_hidden = flags.all || flags.almost_all;
    entries.extend(
        children
            .into_iter()
            .filter(|node| show_hidden || !node.name().starts_with('.'))
            .map(|node| Entry {
                name: node.name().to_string(),
                node,
            }),
    );
    Ok(entries)
}

fn render_entries(
    entries: &[Entry],
    flags: LsFlags,
    now: DateTime<Utc>,
    with_total: bool,
) -> String {
    if entries.is_empty() {
        return if flags.long && with_total {
            "total 0\n".to_string()
        } else {
            String::new()
        };
    }
    if flags.long {
        long_format(entries, now, with_total)
    } else if flags.one_per_line {
        entries.iter().map(|e| format!("{}\n", e.name)).collect()
    } else {
        columns(entries.iter().map(|e| e.name.as_str()).collect())
    }
}

/// Column-major layout the way `ls -C` lays names out.
fn columns(names: Vec<&str>) -> String {
    let total_width: usize = names.iter().map(|n| n.len() + 2).sum();
    if total_width <= TERM_WIDTH {
        return format!("{}\n", names.join("  "));
    }

    let width = names.iter().map(|n| n.len()).max().unwrap_or(0) + 2;
    let cols = (TERM_WIDTH / width).max(1);
    let rows = names.len().div_ceil(cols);
    let mut out = String::new();
    for row in 0..rows {
        let mut line = String::new();
        for col in 0..cols {
            let Some(name) = names.get(col * rows + row) else {
                break;
            };
            let last = names.get((col + 1) * rows + row).is_none();
            if last {
                line.push_str(name);
            } else {
                line.push_str(&format!("{name:<width$}"));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn blocks_1k(size: u64) -> u64 {
    size.div_ceil(4096) * 4
}

fn ls_time(modified: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - modified;
    if age < Duration::seconds(RECENT_SECS) && age >= Duration::zero() {
        modified.format("%b %e %H:%M").to_string()
    } else {
        modified.format("%b %e  %Y").to_string()
    }
}

fn long_format(entries: &[Entry], now: DateTime<Utc>, with_total: bool) -> String {
    let link_w = entries.iter().map(|e| e.node.meta.links.to_string().len()).max().unwrap_or(1);
    let owner_w = entries.iter().map(|e| e.node.meta.owner.len()).max().unwrap_or(1);
    let group_w = entries.iter().map(|e| e.node.meta.group.len()).max().unwrap_or(1);
    let size_w = entries.iter().map(|e| e.node.meta.size.to_string().len()).max().unwrap_or(1);

    let mut out = String::new();
    if with_total {
        let total: u64 = entries.iter().map(|e| blocks_1k(e.node.meta.size)).sum();
        out.push_str(&format!("total {total}\n"));
    }
    for entry in entries {
        let meta = &entry.node.meta;
        out.push_str(&format!(
            "{mode} {links:>link_w$} {owner:<owner_w$} {group:<group_w$} {size:>size_w$} {time} {name}\n",
            mode = entry.node.mode_string(),
            links = meta.links,
            owner = meta.owner,
            group = meta.group,
            size = meta.size,
            time = ls_time(meta.modified, now),
            name = entry.name,
        ));
    }
    out
}

pub fn stat(fs: &mut FilesystemModel, command: &ParsedCommand, cwd: &str, uid: &str) -> String {
    let operands = command.operands();
    if operands.is_empty() {
        return "stat: missing operand\nTry 'stat --help' for more information.\n".to_string();
    }
    let username = fs.username().to_string();
    let mut out = String::new();
    for operand in operands {
        match fs.resolve(operand, cwd) {
            Ok(node) => out.push_str(&stat_block(operand, &node, &username, uid)),
            Err(e) => out.push_str(&format!("stat: cannot stat '{operand}': {}\n", e.reason())),
        }
    }
    out
}

fn stat_block(operand: &str, node: &FsNode, username: &str, uid: &str) -> String {
    let meta = &node.meta;
    let kind = if node.is_dir() {
        "directory"
    } else if meta.size == 0 {
        "regular empty file"
    } else {
        "regular file"
    };
    let time = meta.modified.format("%Y-%m-%d %H:%M:%S%.9f %z").to_string();
    format!(
        "  File: {operand}\n  Size: {size:<15} Blocks: {blocks:<10} IO Block: 4096   {kind}\n\
         Device: 801h/2049d\tInode: {inode:<11} Links: {links}\n\
         Access: ({mode:04o}/{mode_str})  Uid: ({uid:>5}/{owner:>8})   Gid: ({gid:>5}/{group:>8})\n\
         Access: {time}\nModify: {time}\nChange: {time}\n Birth: -\n",
        size = meta.size,
        blocks = blocks_1k(meta.size) * 2,
        inode = meta.inode,
        links = meta.links,
        mode = meta.mode & 0o7777,
        mode_str = node.mode_string(),
        uid = account_id(&meta.owner, username, uid),
        owner = meta.owner,
        gid = account_id(&meta.group, username, uid),
        group = meta.group,
    )
}

#[cfg(test)]
#[path = "listing_tests.rs"]
mod tests;
