//! Sled-backed durable store with one tree per collection.
//!
//! The primary `state` tree holds JSON values by opaque string key; binary
//! assets live in their own `assets` tree so state reads can never observe
//! binary payloads and backup export needs no key sniffing. Auxiliary
//! collections are ensured on every open (additive-only schema upgrade).
//!
//! Callers go through [`initialize`] and never manage the connection
//! themselves; the handle is opened once per process behind an async cell.

use crate::error::{StoreError, StoreResult};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

/// Primary JSON-state collection.
pub(crate) const TREE_STATE: &str = "state";
/// Binary asset collection (distinct namespace from `state`).
pub(crate) const TREE_ASSETS: &str = "assets";
/// Non-durable auth/session flags (cleared by Tier 1 repair).
pub(crate) const TREE_SESSION_FLAGS: &str = "session_flags";
/// Append-only system journal.
pub(crate) const TREE_SYSTEM_LOGS: &str = "system_logs";

/// Auxiliary collections, ensured to exist on every open.
pub(crate) const AUX_TREES: [&str; 12] = [
    "sessions",
    "memories",
    "health_readings",
    "mood_logs",
    "life_events",
    "vault_items",
    "tokens",
    "projects",
    "companion_memories",
    "life_domains",
    "connector_configs",
    "custom_apis",
];

/// Integration scratch collections cleared by Tier 2 repair.
pub(crate) const TRANSIENT_TREES: [&str; 3] = ["tokens", "connector_configs", "custom_apis"];

const ENV_DATA_PATH: &str = "HAVEN_DATA_PATH";
const DEFAULT_DATA_PATH: &str = "./data/haven_store";

static STORE: OnceCell<Arc<DurableStore>> = OnceCell::const_new();

/// Opens (creating if absent) the process-wide store at the default path.
/// Idempotent and safe to call from any number of concurrent call sites;
/// the underlying database is opened exactly once.
pub async fn initialize() -> StoreResult<Arc<DurableStore>> {
    STORE
        .get_or_try_init(|| async {
            let store = DurableStore::open_default()?;
            Ok(Arc::new(store))
        })
        .await
        .cloned()
}

/// A short-lived, locally-resolvable reference to a stored asset.
///
/// The payload is materialized to a temp file so media-rendering UI can
/// point at a path directly. The store does not track handle lifetimes;
/// call [`AssetHandle::release`] when done.
pub struct AssetHandle {
    key: String,
    bytes: Vec<u8>,
    path: PathBuf,
}

impl AssetHandle {
    /// The store key this handle resolves.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw asset bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Filesystem path of the materialized payload.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the materialized file. Best-effort; the temp dir is the
    /// backstop for handles that are never released.
    pub fn release(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Key-addressed persistence over a single sled database.
pub struct DurableStore {
    pub(crate) db: sled::Db,
    /// Volatile session-only flags (never persisted; cleared by Tier 0).
    pub(crate) ephemeral: DashMap<String, serde_json::Value>,
}

impl DurableStore {
    /// Opens or creates the store at `path` and ensures all expected
    /// collections exist.
    pub fn open_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        let store = Self {
            db,
            ephemeral: DashMap::new(),
        };
        store.ensure_collections()?;
        info!("store open at {}", path.as_ref().display());
        Ok(store)
    }

    /// Opens the store at `HAVEN_DATA_PATH` (default `./data/haven_store`).
    pub fn open_default() -> StoreResult<Self> {
        Self::open_path(Self::default_path())
    }

    /// Resolve the on-disk location from the environment.
    pub fn default_path() -> PathBuf {
        let base = std::env::var(ENV_DATA_PATH).unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string());
        PathBuf::from(base)
    }

    /// Additive-only schema upgrade: open every expected tree.
    fn ensure_collections(&self) -> StoreResult<()> {
        for name in [TREE_STATE, TREE_ASSETS, TREE_SESSION_FLAGS, TREE_SYSTEM_LOGS]
            .into_iter()
            .chain(AUX_TREES)
        {
            self.db.open_tree(name)?;
        }
        Ok(())
    }

    pub(crate) fn tree(&self, name: &str) -> StoreResult<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }

    // --- JSON state ---

    /// Upserts a JSON-serializable value under `key`. Full-value
    /// replacement; the store imposes no schema on the value shape.
    pub fn save_state<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.tree(TREE_STATE)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Returns the stored value under `key`, or `None` when absent.
    /// Keys written through [`save_asset`](Self::save_asset) live in a
    /// different namespace and are never visible here.
    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(bytes) = self.tree(TREE_STATE)?.get(key.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    // --- Binary assets ---

    /// Upserts a binary payload under `key` in the asset namespace.
    pub fn save_asset(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        self.tree(TREE_ASSETS)?.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Resolves an asset to a local handle, or `None` when absent (including
    /// keys that only exist in the state namespace).
    pub fn get_asset(&self, key: &str) -> StoreResult<Option<AssetHandle>> {
        let Some(bytes) = self.tree(TREE_ASSETS)?.get(key.as_bytes())? else {
            return Ok(None);
        };
        let path = std::env::temp_dir().join(format!("haven_asset_{}", Uuid::new_v4().simple()));
        std::fs::write(&path, &bytes)
            .map_err(|e| StoreError::StorageUnavailable(format!("asset materialize: {e}")))?;
        debug!("asset {key} materialized at {}", path.display());
        Ok(Some(AssetHandle {
            key: key.to_string(),
            bytes: bytes.to_vec(),
            path,
        }))
    }

    // --- Session / ephemeral tiers ---

    /// Sets a non-durable auth/session flag (Tier 1 repair clears these).
    pub fn set_session_flag(&self, key: &str, value: &str) -> StoreResult<()> {
        self.tree(TREE_SESSION_FLAGS)?
            .insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    /// Reads a session flag.
    pub fn get_session_flag(&self, key: &str) -> StoreResult<Option<String>> {
        let v = self.tree(TREE_SESSION_FLAGS)?.get(key.as_bytes())?;
        Ok(v.map(|iv| String::from_utf8_lossy(&iv).into_owned()))
    }

    /// Sets a volatile, in-memory UI flag (Tier 0 repair clears these).
    pub fn set_ephemeral(&self, key: &str, value: serde_json::Value) {
        self.ephemeral.insert(key.to_string(), value);
    }

    /// Reads a volatile UI flag.
    pub fn get_ephemeral(&self, key: &str) -> Option<serde_json::Value> {
        self.ephemeral.get(key).map(|v| v.clone())
    }
}
