//! Local health probes: connectivity, store, audio input, API credential.

use crate::store::{DurableStore, TREE_STATE};
use cpal::traits::HostTrait;
use serde::Serialize;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

const ENV_PROBE_ADDR: &str = "HAVEN_PROBE_ADDR";
const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:443";
const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Environment keys accepted as the API credential, in priority order.
pub const CREDENTIAL_ENV_KEYS: [&str; 2] = ["HAVEN_API_KEY", "GEMINI_API_KEY"];

/// Diagnostic depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticsMode {
    /// Connectivity, store openability, device and credential presence.
    Quick,
    /// Quick checks plus a read probe against the primary collection.
    Full,
}

impl DiagnosticsMode {
    fn label(&self) -> &'static str {
        match self {
            DiagnosticsMode::Quick => "QUICK",
            DiagnosticsMode::Full => "FULL",
        }
    }
}

/// Probe outcomes. JSON-serializable for display and journal notes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiagnosticsReport {
    pub network: bool,
    pub db: bool,
    pub audio: bool,
    pub api: bool,
}

/// True when an API credential is resolvable from the environment.
pub fn credential_present() -> bool {
    CREDENTIAL_ENV_KEYS
        .iter()
        .any(|key| std::env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false))
}

fn probe_network() -> bool {
    let addr = std::env::var(ENV_PROBE_ADDR).unwrap_or_else(|_| DEFAULT_PROBE_ADDR.to_string());
    let Ok(mut addrs) = addr.to_socket_addrs() else {
        return false;
    };
    addrs.next().is_some_and(|a| TcpStream::connect_timeout(&a, PROBE_TIMEOUT).is_ok())
}

fn probe_audio_input() -> bool {
    cpal::default_host().default_input_device().is_some()
}

impl DurableStore {
    /// Runs the probes and journals a `RUNNING`/`COMPLETE` pair with the
    /// serialized report in the notes.
    pub fn run_diagnostics(&self, mode: DiagnosticsMode) -> DiagnosticsReport {
        self.append_log_entry("DIAGNOSTIC", mode.label(), "RUNNING", None);

        let db = match mode {
            DiagnosticsMode::Quick => self.db.size_on_disk().is_ok(),
            DiagnosticsMode::Full => self.tree(TREE_STATE).and_then(|t| Ok(t.first()?)).is_ok(),
        };

        let report = DiagnosticsReport {
            network: probe_network(),
            db,
            audio: probe_audio_input(),
            api: credential_present(),
        };
        debug!("diagnostics ({}): {report:?}", mode.label());

        let notes = serde_json::to_string(&report).unwrap_or_default();
        self.append_log_entry("DIAGNOSTIC", mode.label(), "COMPLETE", Some(&notes));
        report
    }
}
