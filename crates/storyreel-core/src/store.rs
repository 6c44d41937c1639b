//! Persisted key-value state.
//!
//! Everything the engine keeps across sessions (the credential, its
//! activation flag, the history ledger) goes through a string-keyed store.
//! The file-backed implementation holds the whole store in one JSON document
//! and rewrites it atomically on every mutation; an in-memory implementation
//! backs tests.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::fsutil;

/// Well-known store keys.
pub mod keys {
    /// Encrypted API credential envelope.
    pub const API_KEY: &str = "api_key";
    /// `"true"` once a credential has passed live validation.
    pub const API_KEY_ACTIVATED: &str = "api_key_activated";
    /// JSON-encoded history ledger.
    pub const HISTORY: &str = "history";
}

/// String-keyed persistent state.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> CoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> CoreResult<()>;
    fn remove(&self, key: &str) -> CoreResult<()>;
}

/// Shared handle used by components that persist state.
pub type SharedStateStore = Arc<dyn StateStore>;

// =============================================================================
// JsonFileStore
// =============================================================================

/// File name of the persisted store document.
pub const STATE_FILE: &str = "state.json";

/// Lock file guarding cross-process access to the store document.
pub const STATE_LOCK_FILE: &str = "state.json.lock";

/// Single-document JSON store with atomic rewrites.
pub struct JsonFileStore {
    state_path: PathBuf,
    // Serializes writers within this process; fs2 covers other processes.
    io_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store rooted in `data_dir` (the document lives at
    /// `data_dir/state.json`).
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            state_path: data_dir.as_ref().join(STATE_FILE),
            io_lock: Mutex::new(()),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn lock_path(&self) -> PathBuf {
        self.state_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(STATE_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        let _guard = self
            .io_lock
            .lock()
            .map_err(|_| CoreError::StorageError("State store lock poisoned".into()))?;

        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| CoreError::StorageError(format!("Failed to open state lock file: {e}")))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
                .map_err(|e| CoreError::StorageError(format!("Failed to lock state file: {e}")))?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)
                .map_err(|e| CoreError::StorageError(format!("Failed to lock state file: {e}")))?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock state lock file: {}", e);
        }

        result
    }

    fn read_document(&self) -> BTreeMap<String, String> {
        if !self.state_path.exists() {
            return BTreeMap::new();
        }
        match std::fs::read_to_string(&self.state_path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("State document unreadable, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
            Err(e) => {
                warn!("Failed to read state document: {}", e);
                BTreeMap::new()
            }
        }
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.with_lock(false, || Ok(self.read_document().get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.with_lock(true, || {
            let mut doc = self.read_document();
            doc.insert(key.to_string(), value.to_string());
            fsutil::atomic_write_json_pretty(&self.state_path, &doc)
        })
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        self.with_lock(true, || {
            let mut doc = self.read_document();
            if doc.remove(key).is_some() {
                fsutil::atomic_write_json_pretty(&self.state_path, &doc)?;
            }
            Ok(())
        })
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a key, handy for test setup.
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries
            .lock()
            .expect("memory store lock")
            .insert(key.to_string(), value.to_string());
        self
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| CoreError::StorageError("Memory store lock poisoned".into()))?
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.entries
            .lock()
            .map_err(|_| CoreError::StorageError("Memory store lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries
            .lock()
            .map_err(|_| CoreError::StorageError("Memory store lock poisoned".into()))?
            .remove(key);
        Ok(())
    }
}
