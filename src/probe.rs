//! Interface state probe.
//!
//! The probe is the only source of truth for whether the target interface is
//! administratively up. Monitor signals only say "look again".

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// `UP` as a whole element of the `<...>` flag list printed by `ifconfig`
/// and `ip link`.
static ADMIN_UP: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[<,]UP[,>]").ok());

/// Administrative state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    /// Interface is administratively up.
    Up,
    /// Interface is down, or its state could not be determined.
    Down,
}

impl InterfaceState {
    /// `true` for [`InterfaceState::Up`].
    pub fn is_up(self) -> bool {
        self == Self::Up
    }

    /// `true` for [`InterfaceState::Down`].
    pub fn is_down(self) -> bool {
        self == Self::Down
    }
}

impl std::fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Synchronous source of the current interface state.
pub trait InterfaceStateProbe {
    /// Query the interface. Never fails: anything unexpected reads as `Down`.
    fn query(&self) -> InterfaceState;
}

/// Probe that runs `<program> [args...] <interface>` and scans its stdout.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: PathBuf,
    args: Vec<String>,
    interface: String,
}

impl CommandProbe {
    /// Build a probe for `interface`.
    pub fn new(program: PathBuf, args: Vec<String>, interface: String) -> Self {
        Self {
            program,
            args,
            interface,
        }
    }
}

impl InterfaceStateProbe for CommandProbe {
    fn query(&self) -> InterfaceState {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.interface)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                debug!(
                    program = %self.program.display(),
                    error = %e,
                    "probe failed to launch, treating as down"
                );
                return InterfaceState::Down;
            }
        };

        if !output.status.success() {
            debug!(
                interface = %self.interface,
                exit_code = ?output.status.code(),
                "probe exited non-zero, treating as down"
            );
            return InterfaceState::Down;
        }

        let Ok(stdout) = std::str::from_utf8(&output.stdout) else {
            debug!(interface = %self.interface, "probe output not UTF-8, treating as down");
            return InterfaceState::Down;
        };

        if parse_admin_up(stdout) {
            InterfaceState::Up
        } else {
            InterfaceState::Down
        }
    }
}

/// Whether status-tool output shows the administrative `UP` flag.
pub fn parse_admin_up(output: &str) -> bool {
    ADMIN_UP.as_ref().is_some_and(|re| re.is_match(output))
}
