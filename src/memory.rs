//! Persistent assistant memory: user identity, preferences, learned facts and
//! the conversation log, stored as one JSON document.
//!
//! Persistence is best-effort. Read, parse and write failures are logged and
//! the in-memory state carries on; nothing here returns an error to the
//! conversation layer.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

/// File name used for the memory blob when no explicit path is configured.
pub const DEFAULT_FILE_NAME: &str = "gideon-quantum-memory.json";

/// Number of characters of a fact's text that make up its key.
const FACT_KEY_CHARS: usize = 30;

/// Preference keys and their defaults, in display order.
const DEFAULT_PREFERENCES: [(&str, &str); 3] = [
    ("theme", "futuristic"),
    ("responseSpeed", "normal"),
    ("verbosity", "detailed"),
];

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// Everything the assistant remembers between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Learned from an identity declaration; never replaced once non-empty.
    pub user_name: Option<String>,
    #[serde(rename = "userPreferences", alias = "preferences")]
    pub preferences: IndexMap<String, String>,
    pub conversation_history: Vec<Turn>,
    /// Fact key -> fact text, in first-insertion order.
    pub learned_facts: IndexMap<String, String>,
    pub last_session: DateTime<Utc>,
}

impl Default for MemorySnapshot {
    fn default() -> Self {
        Self {
            user_name: None,
            preferences: DEFAULT_PREFERENCES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            conversation_history: Vec::new(),
            learned_facts: IndexMap::new(),
            last_session: Utc::now(),
        }
    }
}

impl MemorySnapshot {
    /// The stored user name, if one has been learned.
    pub fn known_name(&self) -> Option<&str> {
        self.user_name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Persisted state as read back from storage. Every field is optional so
/// that partial or older documents still load.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedMemory {
    pub user_name: Option<String>,
    #[serde(rename = "userPreferences", alias = "preferences")]
    pub preferences: Option<IndexMap<String, String>>,
    pub conversation_history: Option<Vec<Turn>>,
    pub learned_facts: Option<IndexMap<String, String>>,
    pub last_session: Option<DateTime<Utc>>,
}

/// Shallow field-wise merge: fields present in `loaded` replace the defaults.
pub fn merge(defaults: MemorySnapshot, loaded: PersistedMemory) -> MemorySnapshot {
    MemorySnapshot {
        user_name: loaded.user_name.or(defaults.user_name),
        preferences: loaded.preferences.unwrap_or(defaults.preferences),
        conversation_history: loaded
            .conversation_history
            .unwrap_or(defaults.conversation_history),
        learned_facts: loaded.learned_facts.unwrap_or(defaults.learned_facts),
        last_session: loaded.last_session.unwrap_or(defaults.last_session),
    }
}

/// Derive the key a fact is stored under: the first 30 characters,
/// lowercased, with each whitespace run replaced by a single `_`.
///
/// Distinct facts sharing a 30-character prefix map to the same key.
pub fn fact_key(fact: &str) -> String {
    let head: String = fact.chars().take(FACT_KEY_CHARS).collect();
    let mut key = String::with_capacity(head.len());
    let mut prev_space = false;
    for c in head.to_lowercase().chars() {
        if c.is_whitespace() {
            if !prev_space {
                key.push('_');
            }
            prev_space = true;
        } else {
            key.push(c);
            prev_space = false;
        }
    }
    key
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("memory JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage capability behind the memory store.
///
/// Implementations move an opaque serialized blob; (de)serialization is the
/// store's job.
pub trait MemoryBackend {
    /// Read the persisted blob, `Ok(None)` if nothing was ever saved.
    fn load(&self) -> Result<Option<String>, MemoryError>;

    /// Replace the persisted blob.
    fn save(&self, blob: &str) -> Result<(), MemoryError>;
}

/// Stores the blob as a JSON file on disk.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MemoryBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<String>, MemoryError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|source| MemoryError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, blob: &str) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| MemoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, blob).map_err(|source| MemoryError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Keeps the blob in a shared buffer. Clones share the same buffer, so a
/// second store opened on a clone behaves like a process restart.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    blob: std::rc::Rc<std::cell::RefCell<Option<String>>>,
}

#[cfg(test)]
impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current raw contents, for inspection.
    pub fn contents(&self) -> Option<String> {
        self.blob.borrow().clone()
    }
}

#[cfg(test)]
impl MemoryBackend for InMemoryBackend {
    fn load(&self) -> Result<Option<String>, MemoryError> {
        Ok(self.blob.borrow().clone())
    }

    fn save(&self, blob: &str) -> Result<(), MemoryError> {
        *self.blob.borrow_mut() = Some(blob.to_string());
        Ok(())
    }
}

/// Handle owning the in-memory snapshot and its backend.
pub struct MemoryStore {
    backend: Box<dyn MemoryBackend>,
    history_limit: Option<usize>,
    pub memory: MemorySnapshot,
}

impl MemoryStore {
    /// Load memory through `backend`, falling back to defaults on any failure.
    pub fn load(backend: impl MemoryBackend + 'static) -> Self {
        let defaults = MemorySnapshot::default();
        let memory = match backend.load() {
            Ok(Some(blob)) => match serde_json::from_str::<PersistedMemory>(&blob) {
                Ok(loaded) => merge(defaults, loaded),
                Err(e) => {
                    error!("memory load error: {}", MemoryError::from(e));
                    defaults
                }
            },
            Ok(None) => {
                debug!("no persisted memory, starting fresh");
                defaults
            }
            Err(e) => {
                error!("memory load error: {e}");
                defaults
            }
        };
        Self {
            backend: Box::new(backend),
            history_limit: None,
            memory,
        }
    }

    /// Load memory from a JSON file.
    pub fn open(path: &Path) -> Self {
        Self::load(JsonFileBackend::new(path))
    }

    /// Cap the conversation log at `limit` turns (oldest dropped first).
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self.enforce_history_limit();
        self
    }

    /// Stamp `lastSession` and persist the full snapshot, propagating failures.
    pub fn try_save(&mut self) -> Result<(), MemoryError> {
        self.memory.last_session = Utc::now();
        let json = serde_json::to_string_pretty(&self.memory)?;
        self.backend.save(&json)
    }

    /// Persist the snapshot; failures are logged and swallowed.
    pub fn save(&mut self) {
        if let Err(e) = self.try_save() {
            error!("memory save error: {e}");
        }
    }

    /// Append a turn to the conversation log (not persisted).
    pub fn push_turn(&mut self, text: &str, is_user: bool) {
        self.memory.conversation_history.push(Turn {
            text: text.to_string(),
            is_user,
            timestamp: Utc::now(),
        });
        self.enforce_history_limit();
    }

    /// Store the user's name unless one is already known. Returns whether
    /// the name was set.
    pub fn set_user_name(&mut self, name: &str) -> bool {
        if self.memory.known_name().is_some() || name.is_empty() {
            return false;
        }
        self.memory.user_name = Some(name.to_string());
        true
    }

    /// Store or overwrite a fact, returning its key.
    pub fn remember(&mut self, fact: &str) -> String {
        let key = fact_key(fact);
        self.memory.learned_facts.insert(key.clone(), fact.to_string());
        key
    }

    /// Drop the conversation log, keeping everything else.
    pub fn clear_history(&mut self) {
        self.memory.conversation_history.clear();
    }

    /// Replace the whole snapshot with defaults, forgetting the user's name.
    pub fn reset(&mut self) {
        self.memory = MemorySnapshot::default();
    }

    fn enforce_history_limit(&mut self) {
        if let Some(limit) = self.history_limit {
            let history = &mut self.memory.conversation_history;
            let excess = history.len().saturating_sub(limit);
            if excess > 0 {
                history.drain(..excess);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenBackend;

    impl MemoryBackend for BrokenBackend {
        fn load(&self) -> Result<Option<String>, MemoryError> {
            Ok(Some("{not json".into()))
        }

        fn save(&self, _blob: &str) -> Result<(), MemoryError> {
            Err(MemoryError::Io {
                path: PathBuf::from("/dev/full"),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[test]
    fn fact_key_truncates_lowercases_and_collapses_whitespace() {
        assert_eq!(
            fact_key("le mot de passe wifi est soleil2024"),
            "le_mot_de_passe_wifi_est_solei"
        );
        assert_eq!(fact_key("Mon   Chat\ts'appelle Tom"), "mon_chat_s'appelle_tom");
        assert_eq!(fact_key("Éte"), "éte");
    }

    #[test]
    fn remembering_same_fact_twice_keeps_one_entry() {
        let mut store = MemoryStore::load(InMemoryBackend::new());
        store.remember("le code du portail est 1234");
        store.remember("le code du portail est 1234");
        assert_eq!(store.memory.learned_facts.len(), 1);
    }

    #[test]
    fn colliding_keys_overwrite_in_place() {
        let mut store = MemoryStore::load(InMemoryBackend::new());
        store.remember("first fact");
        store.remember("the inverter serial number is ABC-001");
        store.remember("the inverter serial number is ABC-002");
        let values: Vec<_> = store.memory.learned_facts.values().cloned().collect();
        assert_eq!(
            values,
            vec!["first fact", "the inverter serial number is ABC-002"]
        );
    }

    #[test]
    fn history_survives_restart() {
        let backend = InMemoryBackend::new();
        let mut store = MemoryStore::load(backend.clone());
        store.push_turn("bonjour", true);
        store.push_turn("Bonjour !", false);
        store.save();
        let expected = store.memory.conversation_history.clone();

        let reloaded = MemoryStore::load(backend);
        assert_eq!(reloaded.memory.conversation_history, expected);
    }

    #[test]
    fn file_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_FILE_NAME);
        let mut store = MemoryStore::open(&path);
        assert!(store.set_user_name("Alice"));
        store.remember("la pompe est au sous-sol");
        store.save();

        let reloaded = MemoryStore::open(&path);
        assert_eq!(reloaded.memory.known_name(), Some("Alice"));
        assert_eq!(reloaded.memory.learned_facts.len(), 1);
    }

    #[test]
    fn merge_keeps_defaults_for_missing_fields() {
        let loaded: PersistedMemory =
            serde_json::from_str(r#"{"userName":"Sami","learnedFacts":{"a":"A"}}"#).unwrap();
        let merged = merge(MemorySnapshot::default(), loaded);
        assert_eq!(merged.user_name.as_deref(), Some("Sami"));
        assert_eq!(merged.preferences["theme"], "futuristic");
        assert!(merged.conversation_history.is_empty());
        assert_eq!(merged.learned_facts["a"], "A");
    }

    #[test]
    fn merge_replaces_preferences_wholesale() {
        let loaded: PersistedMemory =
            serde_json::from_str(r#"{"userPreferences":{"theme":"classic"}}"#).unwrap();
        let merged = merge(MemorySnapshot::default(), loaded);
        assert_eq!(merged.preferences.len(), 1);
        assert_eq!(merged.preferences["theme"], "classic");
    }

    #[test]
    fn reads_dashboard_blob_with_millisecond_timestamps() {
        let blob = r#"{
            "userName": null,
            "userPreferences": {"theme": "futuristic", "responseSpeed": "normal", "verbosity": "detailed"},
            "conversationHistory": [
                {"text": "salut", "isUser": true, "timestamp": "2024-05-01T10:00:00.000Z"}
            ],
            "learnedFacts": {},
            "lastSession": "2024-05-01T10:00:01.000Z"
        }"#;
        let backend = InMemoryBackend::new();
        backend.save(blob).unwrap();
        let store = MemoryStore::load(backend);
        assert_eq!(store.memory.conversation_history.len(), 1);
        assert!(store.memory.conversation_history[0].is_user);
        assert_eq!(store.memory.known_name(), None);
    }

    #[test]
    fn broken_backend_falls_back_to_defaults_and_never_panics() {
        let mut store = MemoryStore::load(BrokenBackend);
        assert_eq!(store.memory.known_name(), None);
        assert_eq!(store.memory.preferences.len(), 3);
        store.push_turn("hello", true);
        store.save();
        assert!(store.try_save().is_err());
        assert_eq!(store.memory.conversation_history.len(), 1);
    }

    #[test]
    fn name_is_set_only_once() {
        let mut store = MemoryStore::load(InMemoryBackend::new());
        assert!(store.set_user_name("Alice"));
        assert!(!store.set_user_name("Bob"));
        assert_eq!(store.memory.known_name(), Some("Alice"));
        store.reset();
        assert!(store.set_user_name("Bob"));
    }

    #[test]
    fn history_limit_drops_oldest_turns() {
        let mut store = MemoryStore::load(InMemoryBackend::new()).with_history_limit(Some(2));
        store.push_turn("one", true);
        store.push_turn("two", false);
        store.push_turn("three", true);
        let texts: Vec<_> = store
            .memory
            .conversation_history
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn save_stamps_last_session() {
        let mut store = MemoryStore::load(InMemoryBackend::new());
        store.memory.last_session = DateTime::<Utc>::MIN_UTC;
        store.save();
        assert!(store.memory.last_session > DateTime::<Utc>::MIN_UTC);
    }
}
