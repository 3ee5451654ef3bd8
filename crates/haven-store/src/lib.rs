//! # haven-store — durable local state
//!
//! Key-addressed persistence for the companion app: JSON state and binary
//! assets in separate namespaces, an append-only system journal, whole-store
//! backup/restore, tiered destructive repair, and local health diagnostics.
//!
//! One sled database, one tree per collection. The store is a leaf: it
//! calls out to nothing, and any number of readers/writers may share the
//! process-wide handle from [`initialize`].

mod backup;
mod diagnostics;
mod error;
mod journal;
mod repair;
mod store;

pub use diagnostics::{credential_present, DiagnosticsMode, DiagnosticsReport, CREDENTIAL_ENV_KEYS};
pub use error::{StoreError, StoreResult};
pub use journal::LogEntry;
pub use repair::RepairTier;
pub use store::{initialize, AssetHandle, DurableStore};
