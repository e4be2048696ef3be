//! Configuration loading and validation.
//!
//! `ifguard` reads an optional `config.toml` from its runtime root
//! (`~/.ifguard/` or `$IFGUARD_HOME`). Missing files and missing sections
//! fall back to defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Longest interface name the kernel accepts, including the trailing NUL.
const IFNAMSIZ: usize = 16;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the interface that must stay down (e.g. `awdl0`).
    pub interface: String,

    /// Status-query tool settings.
    pub probe: ProbeConfig,

    /// Privileged toggle helper settings.
    pub helper: HelperConfig,

    /// Settle, retry and polling intervals.
    pub timing: TimingConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            probe: ProbeConfig::default(),
            helper: HelperConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Status-query tool invoked as `<program> [args...] <interface>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Executable to run.
    pub program: PathBuf,

    /// Arguments placed before the interface name.
    pub args: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Self {
                program: PathBuf::from("ip"),
                args: vec!["link".to_owned(), "show".to_owned(), "dev".to_owned()],
            }
        } else {
            Self {
                program: PathBuf::from("/sbin/ifconfig"),
                args: Vec::new(),
            }
        }
    }
}

/// Privileged helper invoked as `<path> <up|down>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Path to the helper binary.
    pub path: PathBuf,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/usr/local/libexec/ifguard-helper"),
        }
    }
}

/// Enforcement timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after a toggle before trusting a fresh probe, in milliseconds.
    pub settle_ms: u64,

    /// Delay between a failed disable and the next attempt, in milliseconds.
    pub retry_ms: u64,

    /// Drift poll interval in seconds.
    pub drift_poll_secs: u64,

    /// Bounded wait of the monitor poll loop, in milliseconds.
    pub monitor_poll_ms: u16,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            retry_ms: 1000,
            drift_poll_secs: 10,
            monitor_poll_ms: 100,
        }
    }
}

impl TimingConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    /// Drift poll interval as a [`Duration`].
    pub fn drift_poll(&self) -> Duration {
        Duration::from_secs(self.drift_poll_secs)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

fn default_interface() -> String {
    "awdl0".to_owned()
}

/// An env override that was set but not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredOverride {
    /// Variable name.
    pub var: &'static str,
    /// Raw value that failed to parse.
    pub value: String,
}

impl IgnoredOverride {
    fn new(var: &'static str, value: String) -> Self {
        Self { var, value }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Unparseable env overrides are skipped and returned so they can be
    /// logged once a subscriber is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(paths: &RuntimePaths) -> anyhow::Result<(Self, Vec<IgnoredOverride>)> {
        let env = |key: &str| std::env::var(key).ok();
        let path = env("IFGUARD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| paths.config_toml.clone());

        let mut config = Self::load_from_file(&path)?;
        let ignored = config.apply_overrides(env);
        config.validate()?;
        Ok((config, ignored))
    }

    /// Load from a TOML file only. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests do not touch the process environment.
    /// Returns the overrides that were set but could not be parsed.
    pub fn apply_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Vec<IgnoredOverride> {
        let mut ignored = Vec::new();
        if let Some(v) = env("IFGUARD_INTERFACE") {
            self.interface = v;
        }
        if let Some(v) = env("IFGUARD_HELPER") {
            self.helper.path = PathBuf::from(v);
        }
        if let Some(v) = env("IFGUARD_PROBE") {
            self.probe.program = PathBuf::from(v);
        }
        if let Some(v) = env("IFGUARD_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("IFGUARD_SETTLE_MS") {
            match v.parse() {
                Ok(n) => self.timing.settle_ms = n,
                Err(_) => ignored.push(IgnoredOverride::new("IFGUARD_SETTLE_MS", v)),
            }
        }
        if let Some(v) = env("IFGUARD_RETRY_MS") {
            match v.parse() {
                Ok(n) => self.timing.retry_ms = n,
                Err(_) => ignored.push(IgnoredOverride::new("IFGUARD_RETRY_MS", v)),
            }
        }
        ignored
    }

    /// Check invariants the daemon relies on.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.interface.is_empty(), "interface name is empty");
        anyhow::ensure!(
            self.interface.len() < IFNAMSIZ,
            "interface name '{}' is longer than {} bytes",
            self.interface,
            IFNAMSIZ.saturating_sub(1)
        );
        anyhow::ensure!(self.timing.settle_ms > 0, "timing.settle_ms must be > 0");
        anyhow::ensure!(self.timing.retry_ms > 0, "timing.retry_ms must be > 0");
        anyhow::ensure!(
            self.timing.drift_poll_secs > 0,
            "timing.drift_poll_secs must be > 0"
        );
        anyhow::ensure!(
            self.timing.monitor_poll_ms > 0,
            "timing.monitor_poll_ms must be > 0"
        );
        Ok(())
    }
}

/// Resolved filesystem locations under the runtime root.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Runtime root directory.
    pub root: PathBuf,
    /// Human-owned configuration file.
    pub config_toml: PathBuf,
    /// Persisted policy flags.
    pub state_json: PathBuf,
    /// Status snapshot rewritten on every state change.
    pub status_json: PathBuf,
    /// Single-instance pid file.
    pub pid_file: PathBuf,
    /// Debug log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Lay out all paths under the given root.
    pub fn under(root: PathBuf) -> Self {
        Self {
            config_toml: root.join("config.toml"),
            state_json: root.join("state.json"),
            status_json: root.join("status.json"),
            pid_file: root.join("ifguard.pid"),
            logs_dir: root.join("logs"),
            root,
        }
    }
}

/// Resolve runtime paths from `$IFGUARD_HOME` or `~/.ifguard/`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    if let Some(home) = std::env::var_os("IFGUARD_HOME") {
        return Ok(RuntimePaths::under(PathBuf::from(home)));
    }
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(RuntimePaths::under(home.home_dir().join(".ifguard")))
}
