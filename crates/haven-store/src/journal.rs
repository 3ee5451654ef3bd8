//! Append-only system journal.
//!
//! Entries are keyed by `{timestamp_ms}_{uuid fragment}` so concurrent
//! appends never collide. Appending must never break a user-facing
//! operation: failures are downgraded to a `tracing` warning.

use crate::store::{DurableStore, TREE_SYSTEM_LOGS};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// One structured journal entry. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    /// What was attempted, e.g. `BACKUP`, `REPAIR`, `DIAGNOSTIC`.
    pub action: String,
    /// Sub-category or tier, e.g. `EXPORT`, `TIER_1`, `FULL`.
    pub level: String,
    /// Outcome, e.g. `STARTED`, `SUCCESS`, `FAILED`.
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DurableStore {
    /// Appends a journal entry. Infallible by contract: storage failures
    /// are logged locally and swallowed.
    pub fn append_log_entry(&self, action: &str, level: &str, result: &str, notes: Option<&str>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().timestamp_millis(),
            action: action.to_string(),
            level: level.to_string(),
            result: result.to_string(),
            notes: notes.map(String::from),
        };
        let suffix = Uuid::new_v4().simple().to_string();
        let key = format!("{}_{}", entry.timestamp, &suffix[..6]);
        let outcome = self
            .tree(TREE_SYSTEM_LOGS)
            .and_then(|tree| {
                let bytes = serde_json::to_vec(&entry)?;
                tree.insert(key.as_bytes(), bytes)?;
                Ok(())
            });
        if let Err(e) = outcome {
            warn!("journal append failed ({action}/{level}/{result}): {e}");
        }
    }

    /// Returns every journal entry, newest first. One materialized read.
    pub fn read_log_entries(&self) -> Vec<LogEntry> {
        let Ok(tree) = self.tree(TREE_SYSTEM_LOGS) else {
            return Vec::new();
        };
        let mut entries: Vec<LogEntry> = tree
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .filter_map(|bytes| serde_json::from_slice(&bytes).ok())
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, DurableStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::open_path(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn append_grows_by_exactly_one() {
        let (_dir, store) = open_temp();
        assert!(store.read_log_entries().is_empty());
        for i in 1..=5 {
            store.append_log_entry("TEST", "UNIT", "OK", None);
            assert_eq!(store.read_log_entries().len(), i);
        }
    }

    #[test]
    fn entries_sorted_newest_first() {
        let (_dir, store) = open_temp();
        store.append_log_entry("FIRST", "UNIT", "OK", None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.append_log_entry("SECOND", "UNIT", "OK", Some("later"));
        let entries = store.read_log_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].timestamp >= entries[1].timestamp);
        assert_eq!(entries[0].action, "SECOND");
        assert_eq!(entries[0].notes.as_deref(), Some("later"));
    }

    #[test]
    fn concurrent_appends_never_collide() {
        let (_dir, store) = open_temp();
        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    s.append_log_entry("RACE", "UNIT", "OK", None);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.read_log_entries().len(), 100);
    }
}
