// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSONL audit log with group commit.
//!
//! Each entry is a single line of JSON: `{"seq":N,"record":{...}}\n`.
//! Appends are buffered and written with one fsync per batch (~10ms or 100
//! records). A log whose tail does not parse is rotated to `.bak` on open and
//! its valid prefix carried over into a fresh file.

use crate::record::AuditRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Upper bound on records held in memory while the disk is failing
const MAX_PENDING: usize = 10_000;

/// Maximum number of rotated `.bak` files to keep
const MAX_BAK_FILES: u32 = 3;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt entry at line {line}: {message}")]
    Corrupt { line: usize, message: String },
}

/// Serialization helper for writing entries without cloning the record.
#[derive(Serialize)]
struct EntryRef<'a> {
    seq: u64,
    record: &'a AuditRecord,
}

/// A single audit log entry with sequence number
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub record: AuditRecord,
}

/// Durable audit log.
///
/// Records are buffered in memory and written to disk either when
/// `needs_flush()` returns true or explicitly via `flush()`. A failed flush
/// keeps the buffer so the next flush retries it, after cutting any partly
/// written batch off the file.
pub struct AuditLog {
    file: File,
    path: PathBuf,
    /// Last sequence number assigned
    write_seq: u64,
    /// Serialized lines waiting to be flushed (without trailing newline)
    pending: VecDeque<Vec<u8>>,
    /// Records discarded because the pending buffer overflowed
    dropped: u64,
    last_flush: Instant,
    /// Fail the next write after this many bytes reach the file
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl AuditLog {
    /// Open or create an audit log at the given path.
    pub fn open(path: &Path) -> Result<Self, AuditLogError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = open_append(path)?;
        let report = scan(&file)?;
        let mut write_seq = report.max_seq;

        if report.corrupt {
            drop(file);

            let bak_path = rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = report.valid_lines.len(),
                "corrupt audit log detected, rotating to .bak and preserving valid entries",
            );
            fs::rename(path, &bak_path)?;

            {
                let mut clean = File::create(path)?;
                for line in &report.valid_lines {
                    clean.write_all(line.as_bytes())?;
                    clean.write_all(b"\n")?;
                }
                clean.sync_all()?;
            }

            file = open_append(path)?;
            write_seq = scan(&file)?.max_seq;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            pending: VecDeque::new(),
            dropped: 0,
            last_flush: Instant::now(),
            #[cfg(test)]
            fail_after: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record to the write buffer.
    ///
    /// Returns the assigned sequence number. The record is NOT durable until
    /// `flush()` succeeds. If the buffer is full the oldest pending record is
    /// discarded and counted in [`AuditLog::take_dropped`].
    pub fn append(&mut self, record: &AuditRecord) -> Result<u64, AuditLogError> {
        let seq = self.write_seq + 1;
        let line = serde_json::to_vec(&EntryRef { seq, record })?;
        self.write_seq = seq;
        if self.pending.len() >= MAX_PENDING {
            self.pending.pop_front();
            self.dropped += 1;
        }
        self.pending.push_back(line);
        Ok(seq)
    }

    /// Check if flush is needed (interval elapsed or buffer full).
    pub fn needs_flush(&self) -> bool {
        !self.pending.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.pending.len() >= FLUSH_THRESHOLD)
    }

    /// Write all buffered records with a single fsync.
    ///
    /// After this returns `Ok`, every appended record is on disk.
    pub fn flush(&mut self) -> Result<(), AuditLogError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(self.pending.iter().map(|l| l.len() + 1).sum());
        for line in &self.pending {
            batch.extend_from_slice(line);
            batch.push(b'\n');
        }
        let committed_len = self.file.metadata()?.len();
        if let Err(e) = self.write_batch(&batch) {
            // A torn tail would be duplicated or split by the retry
            if let Err(truncate) = self.file.set_len(committed_len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate,
                    "failed to cut partial audit batch",
                );
            }
            return Err(e.into());
        }

        self.pending.clear();
        self.last_flush = Instant::now();
        Ok(())
    }

    fn write_batch(&mut self, batch: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.fail_after.take() {
            self.file.write_all(&batch[..limit.min(batch.len())])?;
            return Err(io::Error::other("injected write failure"));
        }
        self.file.write_all(batch)?;
        self.file.sync_all()
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of records dropped since the last call, resetting the counter
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
}

struct Scan {
    max_seq: u64,
    valid_lines: Vec<String>,
    corrupt: bool,
}

/// Read the log from the start, stopping at the first line that does not parse.
fn scan(file: &File) -> Result<Scan, AuditLogError> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut result = Scan {
        max_seq: 0,
        valid_lines: Vec::new(),
        corrupt: false,
    };
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                result.corrupt = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<AuditEntry>(trimmed) {
            Ok(entry) => {
                result.max_seq = result.max_seq.max(entry.seq);
                result.valid_lines.push(trimmed.to_string());
            }
            Err(_) => {
                result.corrupt = true;
                break;
            }
        }
    }

    Ok(result)
}

/// Read every entry of the log at `path`.
///
/// Fails with [`AuditLogError::Corrupt`] on the first unparseable line.
pub fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, AuditLogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry = serde_json::from_str(trimmed).map_err(|e| AuditLogError::Corrupt {
            line: index + 1,
            message: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Pick the `.bak` path for a corrupt log, shifting older backups up.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
