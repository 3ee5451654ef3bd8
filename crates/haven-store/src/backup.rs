//! Backup export and restore ("the Ark").
//!
//! The exported document is one flat JSON object mapping every `state` key
//! to its stored value. Binary assets live in their own tree and are never
//! part of the document. Restore upserts key-by-key inside a single
//! transaction; it does not delete keys absent from the document.

use crate::error::{StoreError, StoreResult};
use crate::store::{DurableStore, TREE_STATE};
use sled::transaction::ConflictableTransactionError;
use tracing::info;

impl DurableStore {
    /// Serializes every state key into one pretty-printed JSON document.
    pub fn export_backup(&self) -> StoreResult<String> {
        self.append_log_entry("BACKUP", "EXPORT", "STARTED", None);
        match self.export_backup_inner() {
            Ok((doc, keys)) => {
                self.append_log_entry("BACKUP", "EXPORT", "SUCCESS", Some(&format!("keys: {keys}")));
                Ok(doc)
            }
            Err(e) => {
                self.append_log_entry("BACKUP", "EXPORT", "FAILED", Some(&e.to_string()));
                Err(e)
            }
        }
    }

    fn export_backup_inner(&self) -> StoreResult<(String, usize)> {
        let tree = self.tree(TREE_STATE)?;
        let mut doc = serde_json::Map::new();
        for item in tree.iter() {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let value: serde_json::Value = serde_json::from_slice(&value)?;
            doc.insert(key, value);
        }
        info!("backup export: {} keys", doc.len());
        let keys = doc.len();
        let serialized = serde_json::to_string_pretty(&serde_json::Value::Object(doc))?;
        Ok((serialized, keys))
    }

    /// Parses a backup document and upserts every contained key into the
    /// state collection atomically. `SUCCESS` is journaled only after the
    /// transaction commits.
    pub fn import_backup(&self, serialized: &str) -> StoreResult<()> {
        self.append_log_entry("BACKUP", "IMPORT", "STARTED", None);

        let parsed: serde_json::Value = match serde_json::from_str(serialized) {
            Ok(v) => v,
            Err(e) => {
                self.append_log_entry("BACKUP", "IMPORT", "FAILED", Some("invalid JSON"));
                return Err(StoreError::InvalidBackupFormat(e.to_string()));
            }
        };
        let Some(map) = parsed.as_object() else {
            self.append_log_entry("BACKUP", "IMPORT", "FAILED", Some("not a JSON object"));
            return Err(StoreError::InvalidBackupFormat(
                "document root must be an object".to_string(),
            ));
        };

        // Encode outside the transaction so the closure stays retry-safe.
        let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(map.len());
        for (key, value) in map {
            encoded.push((key.as_bytes().to_vec(), serde_json::to_vec(value)?));
        }

        let tree = self.tree(TREE_STATE)?;
        let outcome = tree.transaction(|tx| {
            for (key, value) in &encoded {
                tx.insert(key.as_slice(), value.as_slice())?;
            }
            Ok::<(), ConflictableTransactionError<sled::Error>>(())
        });

        match outcome {
            Ok(()) => {
                info!("backup import: {} keys", encoded.len());
                self.append_log_entry(
                    "BACKUP",
                    "IMPORT",
                    "SUCCESS",
                    Some(&format!("keys: {}", encoded.len())),
                );
                Ok(())
            }
            Err(e) => {
                self.append_log_entry("BACKUP", "IMPORT", "FAILED", Some("transaction error"));
                Err(StoreError::TransactionFailed(e.to_string()))
            }
        }
    }
}
