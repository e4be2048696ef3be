//! Privileged toggle executor.
//!
//! The helper is a black box invoked as `<helper> <up|down>`. Exit status 0
//! means the kernel accepted the change; the probe still has the last word.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Set-user-ID bit of `st_mode`.
const S_ISUID: u32 = 0o4000;

/// Requested administrative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    /// Bring the interface up.
    Up,
    /// Take the interface down.
    Down,
}

impl ToggleAction {
    /// Argument passed to the helper.
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for ToggleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Errors from invoking the helper.
#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    /// The helper binary does not exist.
    #[error("helper not found at {0}")]
    NotFound(PathBuf),

    /// The helper exists but could not be started.
    #[error("failed to launch helper: {0}")]
    Launch(#[source] std::io::Error),

    /// The helper ran and reported failure.
    #[error("helper exited with {exit_code:?}: {stderr}")]
    Failed {
        /// Exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },
}

/// Something that can ask the system to change the interface state.
pub trait ToggleExecutor {
    /// Run the toggle and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ToggleError`] if the helper is missing, cannot start, or
    /// exits non-zero.
    fn run(&self, action: ToggleAction) -> Result<(), ToggleError>;
}

/// Executor backed by the external helper binary.
#[derive(Debug, Clone)]
pub struct HelperExecutor {
    path: PathBuf,
}

impl HelperExecutor {
    /// Executor invoking the helper at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Helper location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ToggleExecutor for HelperExecutor {
    fn run(&self, action: ToggleAction) -> Result<(), ToggleError> {
        debug!(helper = %self.path.display(), action = %action, "invoking helper");

        let output = Command::new(&self.path)
            .arg(action.as_arg())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToggleError::NotFound(self.path.clone())
                } else {
                    ToggleError::Launch(e)
                }
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(ToggleError::Failed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Ownership and permission facts about the helper binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperStatus {
    /// Helper path that was inspected.
    pub path: PathBuf,
    /// Whether the file exists.
    pub exists: bool,
    /// Owner uid, if the file exists.
    pub owner_uid: Option<u32>,
    /// Permission bits, if the file exists.
    pub mode: Option<u32>,
    /// Whether the set-user-ID bit is set.
    pub setuid: bool,
}

impl HelperStatus {
    /// Root-owned and setuid, so it can toggle interfaces for an unprivileged caller.
    pub fn is_privileged(&self) -> bool {
        self.exists && self.owner_uid == Some(0) && self.setuid
    }
}

/// Stat the helper without running it.
pub fn inspect_helper(path: &Path) -> HelperStatus {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mode = meta.mode();
            HelperStatus {
                path: path.to_path_buf(),
                exists: true,
                owner_uid: Some(meta.uid()),
                mode: Some(mode & 0o7777),
                setuid: mode & S_ISUID != 0,
            }
        }
        Err(_) => HelperStatus {
            path: path.to_path_buf(),
            exists: false,
            owner_uid: None,
            mode: None,
            setuid: false,
        },
    }
}
