//! ifguard CLI entry point.
//!
//! `run` starts the enforcement daemon; `status`, `block` and `allow` are
//! one-shot commands against the persisted state and a running daemon.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use nix::sys::signal::Signal;
use tracing::{info, warn};

use ifguard::config::{runtime_paths, Config, IgnoredOverride, RuntimePaths};
use ifguard::controller::EnforcementController;
use ifguard::coordinator::{spawn_signal_listener, Coordinator};
use ifguard::executor::{inspect_helper, HelperExecutor};
use ifguard::monitor::RouteEventMonitor;
use ifguard::pidfile::{self, PidFile};
use ifguard::policy::{JsonPolicyStore, PolicyStore};
use ifguard::probe::{CommandProbe, InterfaceStateProbe};
use ifguard::status::{read_status_file, StatusFile};

/// ifguard: keep a network interface administratively down.
#[derive(Parser)]
#[command(name = "ifguard", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the enforcement daemon.
    Run {
        /// Interface to keep down (overrides config).
        #[arg(long)]
        interface: Option<String>,
        /// Enable debug mode: drift polling and JSON file logs.
        #[arg(long)]
        debug: bool,
    },
    /// Probe the interface once and print the current status.
    Status,
    /// Enable blocking.
    Block,
    /// Disable blocking and let the interface come back up.
    Allow,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { interface, debug } => handle_run(interface, debug).await,
        Command::Status => handle_status(),
        Command::Block => handle_set_blocking(true),
        Command::Allow => handle_set_blocking(false),
    }
}

/// Run the daemon until SIGINT/SIGTERM.
async fn handle_run(interface: Option<String>, debug_flag: bool) -> anyhow::Result<()> {
    let paths = runtime_paths()?;
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create {}", paths.root.display()))?;

    let (mut config, ignored) = Config::load(&paths)?;
    if let Some(name) = interface {
        config.interface = name;
        config.validate()?;
    }

    let store = JsonPolicyStore::new(paths.state_json.clone());
    if debug_flag {
        persist_debug_flag(&store);
    }
    let debug_mode = debug_flag || store.load().is_ok_and(|p| p.debug_enabled);

    let _logging_guard =
        ifguard::logging::init_daemon(&paths.logs_dir, &config.logging.level, debug_mode)?;
    log_ignored_overrides(&ignored);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        interface = %config.interface,
        debug = debug_mode,
        "ifguard starting"
    );

    let _pid_file = PidFile::acquire(&paths.pid_file).context("single-instance check failed")?;

    let helper = inspect_helper(&config.helper.path);
    if helper.is_privileged() {
        info!(path = %helper.path.display(), "helper is root-owned setuid");
    } else {
        warn!(
            path = %helper.path.display(),
            exists = helper.exists,
            owner_uid = ?helper.owner_uid,
            mode = ?helper.mode.map(|m| format!("{m:o}")),
            "helper is not root-owned setuid, toggles may fail"
        );
    }

    let controller = EnforcementController::new(
        config.interface.clone(),
        &config.timing,
        Box::new(build_probe(&config)),
        Box::new(HelperExecutor::new(config.helper.path.clone())),
        Box::new(store),
        Box::new(StatusFile::new(paths.status_json.clone())),
    );

    let (mut coordinator, handle) = Coordinator::new(controller, config.timing.drift_poll());

    match RouteEventMonitor::start(
        &config.interface,
        config.timing.monitor_poll_ms,
        handle.signals.clone(),
    ) {
        Ok(monitor) => coordinator.attach_monitor(monitor),
        Err(e) => warn!(error = %e, "failed to start route event monitor"),
    }

    spawn_signal_listener(handle.commands.clone()).context("failed to install signal handlers")?;

    coordinator.run().await;
    info!("ifguard stopped");
    Ok(())
}

/// Print one probe result plus persisted and daemon state.
fn handle_status() -> anyhow::Result<()> {
    ifguard::logging::init_cli();
    let paths = runtime_paths()?;
    let (config, ignored) = Config::load(&paths)?;
    log_ignored_overrides(&ignored);

    let state = build_probe(&config).query();
    let policy = JsonPolicyStore::new(paths.state_json.clone())
        .load()
        .context("failed to read policy")?;
    let helper = inspect_helper(&config.helper.path);
    let daemon = pidfile::read_live_pid(&paths.pid_file);

    println!("interface: {} ({state})", config.interface);
    println!("blocking:  {}", on_off(policy.blocking_enabled));
    println!("debug:     {}", on_off(policy.debug_enabled));
    println!(
        "helper:    {} ({})",
        helper.path.display(),
        if helper.is_privileged() {
            "root setuid"
        } else if helper.exists {
            "not privileged"
        } else {
            "missing"
        }
    );
    match daemon {
        Some(pid) => println!("daemon:    running (pid {pid})"),
        None => println!("daemon:    not running"),
    }
    if daemon.is_some() {
        if let Some(snapshot) = read_status_file(&paths.status_json)? {
            println!("state:     {} [{}]", snapshot.state, snapshot.title);
            if let Some(event) = snapshot.last_event {
                println!("last:      {event}");
            }
        }
    }
    Ok(())
}

/// Persist the blocking flag and tell a running daemon to reload it.
fn handle_set_blocking(enabled: bool) -> anyhow::Result<()> {
    ifguard::logging::init_cli();
    let paths = runtime_paths()?;

    let store = JsonPolicyStore::new(paths.state_json.clone());
    let mut policy = store.load().unwrap_or_default();
    policy.blocking_enabled = enabled;
    store.save(&policy).context("failed to save policy")?;
    println!("blocking {}", on_off(enabled));

    notify_daemon(&paths)
}

fn notify_daemon(paths: &RuntimePaths) -> anyhow::Result<()> {
    match pidfile::signal_daemon(&paths.pid_file, Signal::SIGHUP)
        .context("failed to signal daemon")?
    {
        Some(pid) => println!("daemon (pid {pid}) reloading"),
        None => println!("no daemon running; takes effect on next start"),
    }
    Ok(())
}

fn log_ignored_overrides(ignored: &[IgnoredOverride]) {
    for o in ignored {
        warn!(var = o.var, value = %o.value, "ignoring invalid env override");
    }
}

fn persist_debug_flag(store: &JsonPolicyStore) {
    let mut policy = store.load().unwrap_or_default();
    if !policy.debug_enabled {
        policy.debug_enabled = true;
        if let Err(e) = store.save(&policy) {
            eprintln!("warning: failed to persist debug flag: {e}");
        }
    }
}

fn build_probe(config: &Config) -> CommandProbe {
    CommandProbe::new(
        config.probe.program.clone(),
        config.probe.args.clone(),
        config.interface.clone(),
    )
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
