//! Single-instance guard.

use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Errors from taking the pid file.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    /// Another daemon holds the pid file and is alive.
    #[error("ifguard is already running (pid {0})")]
    AlreadyRunning(i32),

    /// The pid file could not be read or written.
    #[error("pid file I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Held for the life of the daemon; removes the file on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path` for this process.
    ///
    /// A file naming a live process is a refusal; a stale or garbled one is
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PidFileError::AlreadyRunning`] if another live process owns
    /// the file, or [`PidFileError::Io`] on filesystem failure.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        let me = std::process::id();
        if let Some(pid) = read_live_pid(path) {
            if u32::try_from(pid).ok() != Some(me) {
                return Err(PidFileError::AlreadyRunning(pid));
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{me}\n"))?;
        debug!(path = %path.display(), pid = me, "pid file written");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Path of the held file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}

/// Pid recorded in `path`, if that process is still alive.
pub fn read_live_pid(path: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(path).ok()?;
    let pid: i32 = contents.trim().parse().ok()?;
    if pid <= 0 {
        return None;
    }
    is_alive(pid).then_some(pid)
}

/// Whether a process with `pid` exists. `EPERM` means it exists but belongs
/// to someone else.
pub fn is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send `signal` to the daemon named in `path`, if it is alive.
///
/// Returns the pid that was signalled.
///
/// # Errors
///
/// Returns the errno if delivery fails.
pub fn signal_daemon(path: &Path, signal: Signal) -> nix::Result<Option<i32>> {
    let Some(pid) = read_live_pid(path) else {
        return Ok(None);
    };
    kill(Pid::from_raw(pid), signal)?;
    Ok(Some(pid))
}
