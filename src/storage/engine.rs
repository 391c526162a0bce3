//! Storage - durable, size-bounded batch queue plus persisted state
//!
//! One `Storage` per write key. The open batch writer and the rotation index
//! are guarded by a single mutex; every append, rotation, listing, removal
//! and reset goes through it, so concurrent writers can never interleave
//! separators or footers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AnalyticsError, Result};
use crate::state::UserInfo;
use crate::types::{Event, Settings};
use crate::utils::cleanup_temp_files;

use super::batch::{BatchFile, BatchState, BatchWriter, Recovered};
use super::kv::{KeyValueStore, StorageKey};

/// Server accepts at most 500 KB per batch
pub const DEFAULT_MAX_FILE_SIZE: u64 = 475_000;

const STATE_FILE: &str = "state.json";

type FinishHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Durable event queue and key/value state for one write key
pub struct Storage {
    write_key: String,
    dir: PathBuf,
    max_file_size: u64,
    kv: KeyValueStore,
    writer: Mutex<Option<BatchWriter>>,
    on_finish: RwLock<Option<FinishHook>>,
}

impl Storage {
    /// Open (or create) the storage directory `{root}/{write_key}`
    pub fn open<P: AsRef<Path>>(root: P, write_key: &str, max_file_size: u64) -> Result<Self> {
        let dir = root.as_ref().join(write_key);
        fs::create_dir_all(&dir)?;

        let cleaned = cleanup_temp_files(&dir)?;
        if cleaned > 0 {
            tracing::debug!(dir = %dir.display(), cleaned, "removed leftover temp files");
        }

        let kv = KeyValueStore::load(&dir.join(STATE_FILE));

        Ok(Self {
            write_key: write_key.to_string(),
            dir,
            max_file_size,
            kv,
            writer: Mutex::new(None),
            on_finish: RwLock::new(None),
        })
    }

    pub fn write_key(&self) -> &str {
        &self.write_key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Read a persisted value
    pub fn read<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        self.kv.get(key)
    }

    /// Persist a value; `None` removes it
    pub fn write<T: Serialize>(&self, key: StorageKey, value: Option<&T>) -> Result<()> {
        self.kv.set(key, value)
    }

    /// Hook invoked with every path that gets finalized
    pub fn set_on_finish<F>(&self, hook: F)
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        *self.on_finish.write() = Some(Arc::new(hook));
    }

    fn current_index(&self) -> u64 {
        self.kv.get(StorageKey::EventsIndex).unwrap_or(0)
    }

    /// Append an event to the open batch, rotating first if it would
    /// overflow the size cap
    ///
    /// Serialization failures drop the event without touching the file.
    pub fn append(&self, event: &Event) -> Result<()> {
        let line = event
            .to_json_line()
            .map_err(AnalyticsError::JsonUnableToSerialize)?;

        let mut guard = self.writer.lock();

        let mut writer = match guard.take() {
            Some(writer) => writer,
            None => self.open_current()?,
        };

        if writer.would_exceed(line.len(), self.max_file_size) {
            self.finish_writer(writer, false)?;
            writer = self.open_current()?;
        }

        let appended = writer.append(&line);
        *guard = Some(writer);
        appended.map_err(AnalyticsError::from)
    }

    /// Writer for the current index: resumes an unfinished file or starts
    /// a new one. Caller holds the writer lock.
    fn open_current(&self) -> Result<BatchWriter> {
        let mut index = self.current_index();
        // A crash between rename and index bump leaves the index pointing
        // at an already finalized file
        while BatchFile::finalized_path(&self.dir, index).exists() {
            index += 1;
        }
        if index != self.current_index() {
            self.kv.set(StorageKey::EventsIndex, Some(&index))?;
        }

        let path = BatchFile::open_path(&self.dir, index);
        if !path.exists() {
            return BatchWriter::create(path.clone(), index)
                .map_err(|_| AnalyticsError::StorageUnableToOpen(path));
        }

        tracing::debug!(path = %path.display(), "resuming unfinished batch file");
        let (writer, recovered) = BatchWriter::resume(path.clone(), index)
            .map_err(|_| AnalyticsError::StorageUnableToOpen(path))?;

        if recovered == Recovered::Complete {
            // Footer made it to disk but the rename did not
            self.finish_writer(writer, true)?;
            return self.open_current();
        }
        Ok(writer)
    }

    /// Finalize a writer and advance the rotation index. Caller holds the
    /// writer lock.
    fn finish_writer(&self, writer: BatchWriter, already_complete: bool) -> Result<PathBuf> {
        let index = writer.index();
        let open_path = writer.path().to_path_buf();
        let finalized = writer
            .finish(already_complete)
            .map_err(|_| AnalyticsError::StorageUnableToRename(open_path))?;

        let next = (index + 1).max(self.current_index());
        self.kv.set(StorageKey::EventsIndex, Some(&next))?;

        tracing::debug!(path = %finalized.display(), "finalized batch file");
        if let Some(hook) = self.on_finish.read().clone() {
            hook(&finalized);
        }
        Ok(finalized)
    }

    /// Finalized batches ready for upload, newest first
    ///
    /// The open batch, and any file an earlier process left unfinished, is
    /// finalized first so nothing is stranded.
    pub fn list_finalized(&self) -> Result<Vec<BatchFile>> {
        let mut guard = self.writer.lock();

        if let Some(writer) = guard.take() {
            self.finish_writer(writer, false)?;
        }

        for stranded in BatchFile::scan(&self.dir)?
            .into_iter()
            .filter(|f| f.state == BatchState::Open)
        {
            let (writer, recovered) = BatchWriter::resume(stranded.path.clone(), stranded.index)?;
            match recovered {
                Recovered::Entries { count: 0, .. } => {
                    drop(writer);
                    fs::remove_file(&stranded.path)?;
                }
                Recovered::Entries { .. } => {
                    self.finish_writer(writer, false)?;
                }
                Recovered::Complete => {
                    self.finish_writer(writer, true)?;
                }
            }
        }

        Ok(BatchFile::scan(&self.dir)?
            .into_iter()
            .filter(|f| f.state == BatchState::Finalized)
            .collect())
    }

    /// Batch files currently on disk without finalizing anything
    pub fn pending_files(&self, include_open: bool) -> Result<Vec<BatchFile>> {
        let _guard = self.writer.lock();
        Ok(BatchFile::scan(&self.dir)?
            .into_iter()
            .filter(|f| include_open || f.state == BatchState::Finalized)
            .collect())
    }

    /// Delete a batch after confirmed upload (or explicit purge)
    ///
    /// Only batch files directly inside this queue's directory are touched.
    pub fn remove(&self, path: &Path) -> Result<()> {
        if BatchFile::parse(path).is_none() || path.parent() != Some(self.dir.as_path()) {
            return Err(AnalyticsError::StorageNotABatch(path.to_path_buf()));
        }

        let _guard = self.writer.lock();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Discard every batch file and all persisted state
    ///
    /// Destructive; does nothing unless `confirm` is true.
    pub fn hard_reset(&self, confirm: bool) -> Result<()> {
        if !confirm {
            return Ok(());
        }

        let mut guard = self.writer.lock();
        guard.take();

        for file in BatchFile::scan(&self.dir)? {
            match fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.kv.clear()
    }

    /// Persist identity fields whenever the user slice changes
    pub fn persist_user_info(&self, user_info: &UserInfo) -> Result<()> {
        self.write(StorageKey::UserId, user_info.user_id.as_ref())?;
        self.write(StorageKey::Traits, user_info.traits.as_ref())?;
        self.write(StorageKey::AnonymousId, Some(&user_info.anonymous_id))
    }

    pub fn persist_settings(&self, settings: &Settings) -> Result<()> {
        self.write(StorageKey::Settings, Some(settings))
    }

    pub fn cached_settings(&self) -> Option<Settings> {
        self.read(StorageKey::Settings)
    }
}
