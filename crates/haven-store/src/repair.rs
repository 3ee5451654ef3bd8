//! Tiered destructive repair.
//!
//! Four tiers, strictly additive in destructiveness. Every tier journals a
//! `STARTED` entry and a terminal `COMPLETE`/`FAILED` entry, and returns a
//! human-readable status string for direct display. Tiers ≥ 1 leave
//! in-memory application state inconsistent with storage; callers are
//! expected to reload afterwards.

use crate::store::{DurableStore, TRANSIENT_TREES, TREE_SESSION_FLAGS};
use std::fmt;
use tracing::{info, warn};

/// Repair tier, ordered by destructiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairTier {
    /// Clear the volatile session-only UI flags.
    Tier0,
    /// Tier 0 + clear the non-durable auth/session flags.
    Tier1,
    /// Tier 1 + deep transient cleanup (integration scratch collections).
    /// Vault, memory and log collections stay intact.
    Tier2,
    /// Factory reset: every collection in the store is deleted.
    Tier3,
}

impl fmt::Display for RepairTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepairTier::Tier0 => "TIER_0",
            RepairTier::Tier1 => "TIER_1",
            RepairTier::Tier2 => "TIER_2",
            RepairTier::Tier3 => "TIER_3",
        };
        f.write_str(s)
    }
}

impl DurableStore {
    /// Executes the tier's destructive actions. Idempotent per tier.
    pub fn repair(&self, tier: RepairTier) -> String {
        info!("repair protocol {tier}");
        self.append_log_entry("REPAIR", &tier.to_string(), "STARTED", None);
        let status = match tier {
            RepairTier::Tier0 => self.repair_tier0(),
            RepairTier::Tier1 => self.repair_tier1(),
            RepairTier::Tier2 => self.repair_tier2(),
            RepairTier::Tier3 => self.repair_tier3(),
        };
        match status {
            Ok(message) => {
                self.append_log_entry("REPAIR", &tier.to_string(), "COMPLETE", None);
                message
            }
            Err(message) => {
                warn!("repair {tier} failed: {message}");
                self.append_log_entry("REPAIR", &tier.to_string(), "FAILED", Some(&message));
                message
            }
        }
    }

    fn repair_tier0(&self) -> Result<String, String> {
        self.ephemeral.clear();
        Ok("Tier 0 complete: transient cache cleared.".to_string())
    }

    fn repair_tier1(&self) -> Result<String, String> {
        self.ephemeral.clear();
        self.tree(TREE_SESSION_FLAGS)
            .and_then(|t| Ok(t.clear()?))
            .map_err(|e| format!("Tier 1 failed: {e}"))?;
        Ok("Tier 1 complete: session and auth flags reset. Store intact.".to_string())
    }

    fn repair_tier2(&self) -> Result<String, String> {
        self.repair_tier1()?;
        for name in TRANSIENT_TREES {
            self.tree(name)
                .and_then(|t| Ok(t.clear()?))
                .map_err(|e| format!("Tier 2 failed on {name}: {e}"))?;
        }
        Ok("Tier 2 complete: deep cleanse done. Vault, memories and logs intact.".to_string())
    }

    fn repair_tier3(&self) -> Result<String, String> {
        self.ephemeral.clear();
        let names = self.db.tree_names();
        for name in names {
            if name.as_ref() == b"__sled__default" {
                continue;
            }
            self.db
                .drop_tree(&name)
                .map_err(|e| format!("Tier 3 failed: store locked ({e}). Restart and retry."))?;
        }
        self.db
            .clear()
            .map_err(|e| format!("Tier 3 failed: store locked ({e}). Restart and retry."))?;
        Ok("Tier 3 complete: factory reset. All local data wiped.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn populated() -> (tempfile::TempDir, DurableStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::open_path(dir.path()).unwrap();
        store.save_state("user_settings", &json!({"theme": "dark"})).unwrap();
        store.save_asset("portrait", &[9, 9, 9]).unwrap();
        store.set_session_flag("auth_token", "abc").unwrap();
        store.set_ephemeral("panel_open", json!(true));
        store
            .tree("tokens")
            .unwrap()
            .insert(b"t1", b"v1".as_slice())
            .unwrap();
        store
            .tree("vault_items")
            .unwrap()
            .insert(b"v1", b"secret".as_slice())
            .unwrap();
        (dir, store)
    }

    #[test]
    fn tier0_clears_only_ephemeral() {
        let (_dir, store) = populated();
        store.repair(RepairTier::Tier0);
        assert!(store.get_ephemeral("panel_open").is_none());
        assert_eq!(store.get_session_flag("auth_token").unwrap().as_deref(), Some("abc"));
        let v: Option<serde_json::Value> = store.get_state("user_settings").unwrap();
        assert!(v.is_some());
    }

    #[test]
    fn tiers_are_strictly_additive() {
        let (_dir, store) = populated();
        store.repair(RepairTier::Tier1);
        // Everything tier 0 removes is gone, plus session flags.
        assert!(store.get_ephemeral("panel_open").is_none());
        assert!(store.get_session_flag("auth_token").unwrap().is_none());
        // Primary collection untouched.
        let v: Option<serde_json::Value> = store.get_state("user_settings").unwrap();
        assert!(v.is_some());
        assert!(store.get_asset("portrait").unwrap().is_some());

        store.repair(RepairTier::Tier2);
        assert_eq!(store.tree("tokens").unwrap().len(), 0);
        assert_eq!(store.tree("vault_items").unwrap().len(), 1);
        let v: Option<serde_json::Value> = store.get_state("user_settings").unwrap();
        assert!(v.is_some());
    }

    #[test]
    fn tier3_leaves_store_empty() {
        let (_dir, store) = populated();
        store.append_log_entry("NOISE", "UNIT", "OK", None);
        let status = store.repair(RepairTier::Tier3);
        assert!(status.starts_with("Tier 3 complete"));
        let v: Option<serde_json::Value> = store.get_state("user_settings").unwrap();
        assert!(v.is_none());
        assert!(store.get_asset("portrait").unwrap().is_none());
        assert!(store.get_session_flag("auth_token").unwrap().is_none());
        assert_eq!(store.tree("vault_items").unwrap().len(), 0);
        // Only the repair's own terminal entry may remain in the fresh journal.
        assert!(store.read_log_entries().len() <= 1);
    }

    #[test]
    fn each_tier_is_idempotent() {
        let (_dir, store) = populated();
        let first = store.repair(RepairTier::Tier1);
        let second = store.repair(RepairTier::Tier1);
        assert_eq!(first, second);
    }
}
