//! Persisted policy flags (`state.json`).

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// User-controlled switches. Defaults are both off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFlags {
    /// Keep the interface down.
    pub blocking_enabled: bool,
    /// Drift polling and verbose file logging.
    pub debug_enabled: bool,
}

/// Errors from loading or saving policy flags.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("policy store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file exists but is not valid policy JSON, or could not be encoded.
    #[error("policy store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where policy flags live between runs.
pub trait PolicyStore {
    /// Read the stored flags. A store that has never been written returns
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage is unreadable or corrupt.
    fn load(&self) -> Result<PolicyFlags, StoreError>;

    /// Replace the stored flags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the flags cannot be written.
    fn save(&self, flags: &PolicyFlags) -> Result<(), StoreError>;
}

/// Policy flags in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonPolicyStore {
    path: PathBuf,
}

impl JsonPolicyStore {
    /// Store backed by `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyStore for JsonPolicyStore {
    fn load(&self) -> Result<PolicyFlags, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PolicyFlags::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, flags: &PolicyFlags) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(flags)?;
        write_atomic(&self.path, json.as_bytes())?;
        debug!(
            path = %self.path.display(),
            blocking = flags.blocking_enabled,
            debug = flags.debug_enabled,
            "policy saved"
        );
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over `path`, so readers always
/// see a complete file. Creates the parent directory if needed.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}
