//! Persisted key/value state, one JSON document per write key

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::utils::atomic_write;

/// Keys held in the state document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    UserId,
    Traits,
    AnonymousId,
    Settings,
    /// Rotation index of the current batch file
    EventsIndex,
}

impl StorageKey {
    pub const ALL: [StorageKey; 5] = [
        StorageKey::UserId,
        StorageKey::Traits,
        StorageKey::AnonymousId,
        StorageKey::Settings,
        StorageKey::EventsIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::UserId => "userId",
            StorageKey::Traits => "traits",
            StorageKey::AnonymousId => "anonymousId",
            StorageKey::Settings => "settings",
            StorageKey::EventsIndex => "events.index",
        }
    }
}

pub(crate) struct KeyValueStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl KeyValueStore {
    /// Load the document at `path`; a missing or unreadable document starts empty
    pub fn load(path: &Path) -> Self {
        let values = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "discarding unreadable state file");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };

        Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let raw = self.values.lock().get(key.as_str())?.clone();
        serde_json::from_value(raw).ok()
    }

    /// Store a value, or remove the key when `value` is `None`
    pub fn set<T: Serialize>(&self, key: StorageKey, value: Option<&T>) -> crate::Result<()> {
        let encoded = match value {
            Some(v) => Some(serde_json::to_value(v).map_err(crate::AnalyticsError::JsonUnableToSerialize)?),
            None => None,
        };

        let mut values = self.values.lock();
        let changed = match encoded {
            Some(v) => values.insert(key.as_str().to_string(), v.clone()).as_ref() != Some(&v),
            None => values.remove(key.as_str()).is_some(),
        };
        if changed {
            self.persist(&values)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> crate::Result<()> {
        let mut values = self.values.lock();
        values.clear();
        self.persist(&values)
    }

    fn persist(&self, values: &Map<String, Value>) -> crate::Result<()> {
        let content = serde_json::to_string(values).map_err(crate::AnalyticsError::JsonUnableToSerialize)?;
        atomic_write(&self.path, &content)?;
        Ok(())
    }
}
