//! Append-only JSON-lines commit journal.
//!
//! One line per committed batch. Replaying the journal in order rebuilds
//! the exact snapshot sequence. A crash mid-append leaves at most one
//! partial trailing line, which is dropped on open.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tx::{TxId, WriteBatch};
use super::StoreError;

/// One committed batch as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub version: u64,
    pub tx: TxId,
    pub committed_at: DateTime<Utc>,
    pub batch: WriteBatch,
}

pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (or create) the journal and return the entries already in it.
    pub fn open(path: &Path) -> Result<(Self, Vec<JournalEntry>), StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| journal_err(path, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| journal_err(path, e))?;

        let (entries, good_len, total_len) = read_entries(&mut file, path)?;
        if good_len < total_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = total_len - good_len,
                "dropping partial trailing journal line"
            );
            file.set_len(good_len).map_err(|e| journal_err(path, e))?;
        }
        file.seek(SeekFrom::End(0)).map_err(|e| journal_err(path, e))?;

        Ok((Self { path: path.to_path_buf(), file }, entries))
    }

    /// Append one entry and sync it to disk. On failure the file is cut
    /// back to its previous length so no partial line stays behind.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.append_with(entry, |file, line| {
            file.write_all(line)?;
            file.flush()?;
            file.sync_data()
        })
    }

    fn append_with(
        &mut self,
        entry: &JournalEntry,
        write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
    ) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| StoreError::Journal(format!("encode: {e}")))?;
        line.push(b'\n');
        let len = self.file.metadata().map_err(|e| journal_err(&self.path, e))?.len();
        let Err(e) = write(&mut self.file, &line) else {
            return Ok(());
        };
        tracing::warn!(path = %self.path.display(), error = %e, "journal append failed, truncating");
        self.file
            .set_len(len)
            .and_then(|_| self.file.seek(SeekFrom::End(0)))
            .map_err(|e| journal_err(&self.path, e))?;
        Err(journal_err(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the parsed entries, the byte length covered by complete lines,
/// and the total file length.
fn read_entries(file: &mut File, path: &Path) -> Result<(Vec<JournalEntry>, u64, u64), StoreError> {
    file.seek(SeekFrom::Start(0)).map_err(|e| journal_err(path, e))?;
    let mut reader = BufReader::new(&*file);
    let mut entries = Vec::new();
    let mut good_len = 0u64;
    let mut total_len = 0u64;
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).map_err(|e| journal_err(path, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;
        total_len += n as u64;
        if !line.ends_with('\n') {
            // unterminated last line: the append never finished
            break;
        }
        if line.trim().is_empty() {
            good_len = total_len;
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line.trim_end()) {
            Ok(entry) => {
                entries.push(entry);
                good_len = total_len;
            }
            Err(e) => {
                return Err(StoreError::Corrupt(format!(
                    "{} line {line_no}: {e}",
                    path.display()
                )));
            }
        }
    }
    Ok((entries, good_len, total_len))
}

fn journal_err(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Journal(format!("{}: {e}", path.display()))
}
