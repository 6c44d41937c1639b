//! Generation History
//!
//! Bounded ledger of rendered artifacts, newest first. The whole list is
//! persisted through the shared [`StateStore`] on every mutation; capacity
//! overflow silently drops the oldest entries.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreResult;
use crate::store::{keys, SharedStateStore};

/// Most entries the ledger retains.
pub const HISTORY_CAPACITY: usize = 50;

// =============================================================================
// Entries
// =============================================================================

/// Artifact kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryKind {
    Image,
    Video,
}

/// One generated artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub kind: HistoryKind,
    /// The artifact itself or a pointer to it; rendered stills carry their
    /// `data:` URI inline.
    pub artifact_ref: String,
    /// Prompt that produced the artifact.
    pub source_prompt: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryKind, artifact_ref: impl Into<String>, source_prompt: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            kind,
            artifact_ref: artifact_ref.into(),
            source_prompt: source_prompt.into(),
            created_at: Utc::now(),
        }
    }

    pub fn image(artifact_ref: impl Into<String>, source_prompt: impl Into<String>) -> Self {
        Self::new(HistoryKind::Image, artifact_ref, source_prompt)
    }

    pub fn video(artifact_ref: impl Into<String>, source_prompt: impl Into<String>) -> Self {
        Self::new(HistoryKind::Video, artifact_ref, source_prompt)
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Bounded, persisted artifact history.
pub struct HistoryLedger {
    store: SharedStateStore,
    /// Newest first.
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryLedger {
    /// Loads the persisted list; a corrupt payload degrades to empty.
    pub fn new(store: SharedStateStore) -> Self {
        let entries = match store.get(keys::HISTORY) {
            Ok(Some(payload)) => match serde_json::from_str::<Vec<HistoryEntry>>(&payload) {
                Ok(mut list) => {
                    list.truncate(HISTORY_CAPACITY);
                    list
                }
                Err(e) => {
                    warn!("Persisted history is unreadable, starting empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to load history: {}", e);
                Vec::new()
            }
        };

        Self {
            store,
            entries: Mutex::new(entries),
        }
    }

    /// Prepends an entry, truncates to capacity, persists the whole list.
    pub fn append(&self, entry: HistoryEntry) -> CoreResult<()> {
        let mut entries = self.entries.lock().expect("history lock");
        entries.insert(0, entry);
        entries.truncate(HISTORY_CAPACITY);
        self.persist(&entries)
    }

    /// Drops everything and persists the empty list.
    pub fn clear(&self) -> CoreResult<()> {
        let mut entries = self.entries.lock().expect("history lock");
        entries.clear();
        self.persist(&entries)
    }

    /// All entries, newest first.
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries.lock().expect("history lock").clone()
    }

    /// The `limit` newest entries.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .expect("history lock")
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("history lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &[HistoryEntry]) -> CoreResult<()> {
        let payload = serde_json::to_string(entries)?;
        self.store.set(keys::HISTORY, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn ledger() -> (HistoryLedger, SharedStateStore) {
        let store: SharedStateStore = Arc::new(MemoryStore::new());
        (HistoryLedger::new(store.clone()), store)
    }

    #[test]
    fn append_keeps_newest_fifty() {
        let (ledger, _store) = ledger();
        for i in 1..=55 {
            ledger
                .append(HistoryEntry::image(format!("uri-{i}"), format!("prompt-{i}")))
                .unwrap();
        }

        let entries = ledger.list();
        assert_eq!(entries.len(), HISTORY_CAPACITY);
        assert_eq!(entries[0].artifact_ref, "uri-55");
        assert_eq!(entries[49].artifact_ref, "uri-6");
    }

    #[test]
    fn list_is_newest_first() {
        let (ledger, _store) = ledger();
        ledger.append(HistoryEntry::image("a", "first")).unwrap();
        ledger.append(HistoryEntry::image("b", "second")).unwrap();

        let entries = ledger.list();
        assert_eq!(entries[0].source_prompt, "second");
        assert_eq!(entries[1].source_prompt, "first");
        assert_eq!(ledger.recent(1).len(), 1);
        assert_eq!(ledger.recent(1)[0].source_prompt, "second");
    }

    #[test]
    fn ledger_survives_reopen() {
        let (ledger, store) = ledger();
        ledger.append(HistoryEntry::image("a", "one")).unwrap();
        ledger
            .append(HistoryEntry::video("b", "two"))
            .unwrap();

        let reopened = HistoryLedger::new(store);
        let entries = reopened.list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, HistoryKind::Video);
        assert_eq!(entries[1].kind, HistoryKind::Image);
    }

    #[test]
    fn corrupt_payload_degrades_to_empty() {
        let store: SharedStateStore = Arc::new(MemoryStore::new());
        store.set(keys::HISTORY, "not json at all").unwrap();

        let ledger = HistoryLedger::new(store);
        assert!(ledger.is_empty());
        ledger.append(HistoryEntry::image("a", "p")).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn clear_persists_empty_list() {
        let (ledger, store) = ledger();
        ledger.append(HistoryEntry::image("a", "p")).unwrap();
        ledger.clear().unwrap();

        assert!(ledger.is_empty());
        let reopened = HistoryLedger::new(store);
        assert!(reopened.is_empty());
    }
}
