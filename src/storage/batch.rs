//! Batch files and their on-disk state machine
//!
//! ```text
//!   append            finish (footer + rename)        remove
//! ───────► {n}-events ─────────────────────────► {n}-events.batch ───────► (gone)
//!            Open                                   Finalized
//! ```
//!
//! Framing inside a file, one entry per line:
//!
//! ```text
//! {"batch":[
//! {...first event...}
//! ,{...second event...}
//! ]}
//! ```
//!
//! Line framing lets a file left open by a crash be validated entry by entry
//! before appending resumes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::utils::atomic_write_with;

pub const BATCH_HEADER: &str = "{\"batch\":[";
pub const BATCH_FOOTER: &str = "\n]}";
const FILE_STEM_SUFFIX: &str = "-events";
pub const FINALIZED_EXTENSION: &str = "batch";

/// Lifecycle state of a batch file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Being appended to; no footer yet
    Open,
    /// Footer written and renamed; immutable, eligible for upload
    Finalized,
}

/// A batch file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: PathBuf,
    /// Rotation index, increases with every finalized file
    pub index: u64,
    pub state: BatchState,
}

impl BatchFile {
    pub fn open_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("{}{}", index, FILE_STEM_SUFFIX))
    }

    pub fn finalized_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("{}{}.{}", index, FILE_STEM_SUFFIX, FINALIZED_EXTENSION))
    }

    /// Recognize a batch file from its name
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (stem, state) = match name.strip_suffix(&format!(".{}", FINALIZED_EXTENSION)) {
            Some(stem) => (stem, BatchState::Finalized),
            None => (name, BatchState::Open),
        };
        let index = stem.strip_suffix(FILE_STEM_SUFFIX)?.parse().ok()?;

        Some(Self {
            path: path.to_path_buf(),
            index,
            state,
        })
    }

    /// All batch files in `dir`, newest index first
    pub fn scan(dir: &Path) -> io::Result<Vec<BatchFile>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(file) = Self::parse(&path) {
                files.push(file);
            }
        }
        files.sort_by(|a, b| b.index.cmp(&a.index));
        Ok(files)
    }
}

/// Result of validating an unfinished file
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Recovered {
    /// Entries are intact (possibly after dropping a torn tail)
    Entries { count: usize, bytes: u64 },
    /// Footer already present; the file only missed its rename
    Complete,
}

/// Append handle for the single open batch file
pub(crate) struct BatchWriter {
    file: File,
    path: PathBuf,
    index: u64,
    bytes: u64,
    entries: usize,
}

impl BatchWriter {
    /// Start a fresh file with the batch header
    pub fn create(path: PathBuf, index: u64) -> io::Result<Self> {
        let mut file = File::create(&path)?;
        file.write_all(BATCH_HEADER.as_bytes())?;

        Ok(Self {
            file,
            path,
            index,
            bytes: BATCH_HEADER.len() as u64,
            entries: 0,
        })
    }

    /// Reopen a file left unfinished by an earlier process
    ///
    /// Entries are re-validated; anything after the last complete entry
    /// (a write torn by the crash) is cut off before appending continues.
    pub fn resume(path: PathBuf, index: u64) -> io::Result<(Self, Recovered)> {
        let content = fs::read_to_string(&path)?;
        let recovered = validate(&content);

        if let Recovered::Entries { bytes, .. } = recovered {
            if bytes == 0 || bytes != content.len() as u64 {
                tracing::warn!(
                    path = %path.display(),
                    kept = bytes,
                    total = content.len(),
                    "dropping torn tail of unfinished batch file"
                );
                let kept = if bytes == 0 { BATCH_HEADER } else { &content[..bytes as usize] };
                atomic_write_with(&path, |file| file.write_all(kept.as_bytes()))?;
            }
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        let (bytes, entries) = match recovered {
            Recovered::Entries { count, bytes } => (bytes.max(BATCH_HEADER.len() as u64), count),
            Recovered::Complete => (content.len() as u64, 0),
        };

        Ok((
            Self {
                file,
                path,
                index,
                bytes,
                entries,
            },
            recovered,
        ))
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Serialized cost of appending `entry_len` bytes, separators included
    fn cost(&self, entry_len: usize) -> u64 {
        let separator = if self.entries > 0 { 2 } else { 1 };
        separator + entry_len as u64
    }

    /// Whether appending the entry would push the finished file past `cap`
    ///
    /// An empty file always accepts its first entry, so an oversized event
    /// lands alone in its own batch instead of blocking the queue.
    pub fn would_exceed(&self, entry_len: usize, cap: u64) -> bool {
        self.entries > 0 && self.bytes + self.cost(entry_len) + BATCH_FOOTER.len() as u64 > cap
    }

    pub fn append(&mut self, entry: &str) -> io::Result<()> {
        let cost = self.cost(entry.len());
        let mut buf = String::with_capacity(cost as usize);
        buf.push('\n');
        if self.entries > 0 {
            buf.push(',');
        }
        buf.push_str(entry);

        // one write per entry keeps a crash from splitting separator and body
        self.file.write_all(buf.as_bytes())?;
        self.bytes += cost;
        self.entries += 1;
        Ok(())
    }

    /// Write the footer and rename to the finalized name
    pub fn finish(mut self, already_complete: bool) -> io::Result<PathBuf> {
        if !already_complete {
            self.file.write_all(BATCH_FOOTER.as_bytes())?;
        }
        self.file.sync_all()?;
        drop(self.file);

        let dir = self.path.parent().map(Path::to_path_buf).unwrap_or_default();
        let finalized = BatchFile::finalized_path(&dir, self.index);
        fs::rename(&self.path, &finalized)?;
        Ok(finalized)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Walk an unfinished file and find where the last complete entry ends
pub(crate) fn validate(content: &str) -> Recovered {
    if !content.starts_with(BATCH_HEADER) {
        return Recovered::Entries { count: 0, bytes: 0 };
    }
    if content.ends_with(BATCH_FOOTER) {
        return Recovered::Complete;
    }

    let mut count = 0;
    let mut valid_end = BATCH_HEADER.len();
    let mut offset = BATCH_HEADER.len();

    for line in content[BATCH_HEADER.len()..].split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let body = line.trim_end_matches('\n');
        if body.is_empty() {
            continue;
        }
        let body = if count > 0 {
            match body.strip_prefix(',') {
                Some(rest) => rest,
                None => break,
            }
        } else {
            body
        };
        if serde_json::from_str::<serde_json::Value>(body).is_err() {
            break;
        }

        count += 1;
        // each entry is "\n" + [","] + json; the newline belongs to the entry
        valid_end = line_start + line.trim_end_matches('\n').len();
    }

    Recovered::Entries {
        count,
        bytes: valid_end as u64,
    }
}
