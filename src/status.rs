//! Status reporting (`status.json`).
//!
//! The snapshot is what a status bar or `ifguard status` would show: the
//! interface direction, whether blocking is on, and what the enforcer is
//! doing right now.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::controller::EnforcementEvent;
use crate::policy::write_atomic;

/// Point-in-time view of the enforcer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Watched interface name.
    pub interface: String,
    /// Last state reported by the probe.
    pub interface_up: bool,
    /// Policy: keep the interface down.
    pub blocking_enabled: bool,
    /// Policy: drift polling and verbose logs.
    pub debug_enabled: bool,
    /// Enforcement state name (`idle`, `monitoring`, `disabling`, `enabling`).
    pub state: String,
    /// Current disable attempt, while disabling.
    pub attempt: Option<u32>,
    /// Whether the kernel event monitor is alive.
    pub monitor_running: bool,
    /// Short label, e.g. `awdl0 ↑ ⚠`.
    pub title: String,
    /// Set while the interface is up against policy.
    pub warning: Option<String>,
    /// Most recent enforcement outcome.
    pub last_event: Option<String>,
    /// RFC 3339 timestamp of this snapshot.
    pub updated_at: String,
}

/// Short label: an arrow for the direction, plus a warning mark when the
/// interface is up while blocking is enabled.
pub fn status_title(interface: &str, up: bool, blocking: bool) -> String {
    match (up, blocking) {
        (true, true) => format!("{interface} ↑ ⚠"),
        (true, false) => format!("{interface} ↑"),
        (false, _) => format!("{interface} ↓"),
    }
}

/// Receives status updates and enforcement outcomes from the controller.
pub trait StatusSink {
    /// The visible state changed.
    fn refresh(&mut self, snapshot: &StatusSnapshot);

    /// An enforcement step finished. Default ignores it.
    fn record(&mut self, _event: &EnforcementEvent) {}
}

/// Sink that keeps `status.json` current.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    last_event: Option<String>,
}

impl StatusFile {
    /// Sink writing to `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_event: None,
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusSink for StatusFile {
    fn refresh(&mut self, snapshot: &StatusSnapshot) {
        let mut snapshot = snapshot.clone();
        if snapshot.last_event.is_none() {
            snapshot.last_event.clone_from(&self.last_event);
        }
        if let Err(e) = write_status_file(&snapshot, &self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to write status file");
        }
    }

    fn record(&mut self, event: &EnforcementEvent) {
        self.last_event = Some(event.to_string());
    }
}

/// Write a snapshot atomically.
///
/// # Errors
///
/// Returns an error if serialization or file operations fail.
pub fn write_status_file(snapshot: &StatusSnapshot, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    let json = serde_json::to_string_pretty(snapshot).context("failed to serialize status")?;
    write_atomic(path, json.as_bytes()).context("failed to write status file")?;
    debug!(title = %snapshot.title, "status.json updated");
    Ok(())
}

/// Read the last snapshot a daemon wrote, if any.
///
/// # Errors
///
/// Returns an error if the file exists but is unreadable or not a snapshot.
pub fn read_status_file(path: &Path) -> anyhow::Result<Option<StatusSnapshot>> {
    use anyhow::Context;

    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}
