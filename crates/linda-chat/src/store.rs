//! Local persistence of the conversation and user preferences.
//!
//! Values are stored as JSON strings under fixed keys, one map per store.
//! Reads never fail outward: missing or corrupt values fall back to their
//! defaults. Write failures are logged and otherwise ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::ChatError;
use crate::message::Conversation;
use crate::persona::{DEFAULT_STYLE, WELCOME_GREETING};

pub const KEY_CHAT_HISTORY: &str = "chatHistory";
pub const KEY_STYLE_NAME: &str = "styleName";
pub const KEY_MOOD_ENABLED: &str = "moodEnabled";
pub const KEY_LAST_INTERACTION: &str = "lastInteraction";
pub const KEY_API_KEY: &str = "apiKey";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ChatError>;
    fn remove(&self, key: &str) -> Result<(), ChatError>;
}

/// Reads and decodes `key`, falling back to `default` on any problem.
pub fn load_or_default<T, F>(store: &dyn KeyValueStore, key: &str, default: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return default(),
        Err(err) => {
            warn!(event = "store.load_failed", key, error = %err);
            return default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "store.value_corrupt", key, error = %err);
            default()
        }
    }
}

/// Encodes and writes `value`, logging instead of failing.
pub fn save_quietly<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(|e| ChatError::Storage(format!("failed to encode {key}: {e}")))
        .and_then(|raw| store.set(key, &raw));
    if let Err(err) = result {
        warn!(event = "store.save_failed", key, error = %err);
    }
}

/// In-process store, used by tests and when no file is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Store backed by one JSON object in a file.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens `path`. A missing file starts empty; an unreadable or corrupt
    /// file is logged and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(event = "store.file_corrupt", path = %path.display(), error = %err);
                BTreeMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(event = "store.file_unreadable", path = %path.display(), error = %err);
                BTreeMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), ChatError> {
        let storage = |e: std::io::Error| {
            ChatError::Storage(format!("failed to write {}: {e}", self.path.display()))
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let raw = serde_json::to_string_pretty(values)
            .map_err(|e| ChatError::Storage(format!("failed to encode store: {e}")))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, raw).map_err(storage)?;
        std::fs::rename(&tmp, &self.path).map_err(storage)?;
        debug!(event = "store.flushed", path = %self.path.display(), keys = values.len() as u64);
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<(), ChatError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

/// Everything the client keeps between runs.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedState {
    pub conversation: Conversation,
    pub style_name: String,
    pub mood_enabled: bool,
    pub last_interaction: DateTime<Utc>,
    pub api_key: Option<String>,
}

impl PersistedState {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let conversation = load_or_default(store, KEY_CHAT_HISTORY, || {
            Conversation::seeded(WELCOME_GREETING)
        });
        let conversation = if conversation.is_empty() {
            Conversation::seeded(WELCOME_GREETING)
        } else {
            conversation
        };
        let last_millis: i64 =
            load_or_default(store, KEY_LAST_INTERACTION, || Utc::now().timestamp_millis());
        Self {
            conversation,
            style_name: load_or_default(store, KEY_STYLE_NAME, || DEFAULT_STYLE.to_string()),
            mood_enabled: load_or_default(store, KEY_MOOD_ENABLED, || true),
            last_interaction: DateTime::from_timestamp_millis(last_millis).unwrap_or_else(Utc::now),
            api_key: load_or_default::<Option<String>, _>(store, KEY_API_KEY, || None)
                .filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        save_quietly(store, KEY_CHAT_HISTORY, &self.conversation);
        save_quietly(store, KEY_STYLE_NAME, &self.style_name);
        save_quietly(store, KEY_MOOD_ENABLED, &self.mood_enabled);
        save_quietly(store, KEY_LAST_INTERACTION, &self.last_interaction.timestamp_millis());
        match &self.api_key {
            Some(key) => save_quietly(store, KEY_API_KEY, key),
            None => {
                if let Err(err) = store.remove(KEY_API_KEY) {
                    warn!(event = "store.save_failed", key = KEY_API_KEY, error = %err);
                }
            }
        }
    }
}
