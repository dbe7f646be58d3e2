//! Visitor journal - durable append-only record of store writes
//!
//! Records are written in JSONL format (one JSON object per line). Every
//! insert or update appends the full record; replay applies lines in order so
//! the last line for an id wins.

use crate::domain::types::{Visitor, VisitorTemplate};
use crate::infra::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    Visitor { visitor: Visitor },
    Template { template: VisitorTemplate },
}

/// Append-only JSONL journal
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        info!(file_path = %path.display(), "journal_initialized");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry in file order. A missing file is an empty journal.
    ///
    /// A malformed final line is the remains of an interrupted append: it is
    /// logged, cut from the file and skipped. A malformed line followed by
    /// further entries is corruption and fails the replay.
    pub fn replay(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut buf = Vec::new();
        let mut offset = 0u64;
        let mut line_no = 0usize;
        // Malformed line (number, byte offset, error) not yet known to be the tail
        let mut malformed: Option<(usize, u64, serde_json::Error)> = None;

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let start = offset;
            offset += read as u64;

            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if let Some((line, _, source)) = malformed.take() {
                return Err(StoreError::Corrupt { line, source });
            }
            match serde_json::from_slice(&buf) {
                Ok(entry) => entries.push(entry),
                Err(source) => malformed = Some((line_no, start, source)),
            }
        }

        if let Some((line, start, source)) = malformed {
            warn!(
                file_path = %self.path.display(),
                line = %line,
                error = %source,
                "journal_truncated_tail"
            );
            // Later appends must start on a fresh line
            OpenOptions::new().write(true).open(&self.path)?.set_len(start)?;
        }

        info!(file_path = %self.path.display(), entries = %entries.len(), "journal_replayed");
        Ok(entries)
    }

    /// Append one entry
    pub fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let line = serde_json::to_string(entry).map_err(StoreError::Encode)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.path.display(), bytes = %line.len(), "journal_written");

        Ok(())
    }
}
