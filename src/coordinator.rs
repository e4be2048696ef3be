//! Single-threaded event loop around the controller.
//!
//! Everything that touches enforcement state runs here: monitor signals,
//! elapsed timers, drift ticks and runtime commands. Timers are one-shot
//! sleeps that post their [`Timer`] back into the loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::controller::{EnforcementController, Timer, Wakeup};
use crate::drift::DriftPoller;
use crate::monitor::{ChangeSignal, LinkEventSource};

/// Runtime requests from outside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set blocking explicitly.
    SetBlocking(bool),
    /// Flip blocking.
    TogglePolicy,
    /// Flip debug mode.
    ToggleDebug,
    /// Re-read the persisted policy.
    ReloadPolicy,
    /// Stop the loop.
    Shutdown,
}

/// Senders into a running [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    /// Capacity-1 change signal channel for the monitor.
    pub signals: mpsc::Sender<ChangeSignal>,
    /// Command channel.
    pub commands: mpsc::UnboundedSender<Command>,
}

/// Owns the controller and drives it from every event source.
#[derive(Debug)]
pub struct Coordinator {
    controller: EnforcementController,
    monitor: Option<Box<dyn LinkEventSource>>,
    monitor_alive: bool,
    drift: DriftPoller,
    signals_rx: mpsc::Receiver<ChangeSignal>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    timers_tx: mpsc::UnboundedSender<Timer>,
    timers_rx: mpsc::UnboundedReceiver<Timer>,
}

impl Coordinator {
    /// Wrap `controller`. The drift poller ticks every `drift_period` while
    /// debug mode is on or no monitor is running.
    pub fn new(
        controller: EnforcementController,
        drift_period: Duration,
    ) -> (Self, CoordinatorHandle) {
        let (signals_tx, signals_rx) = mpsc::channel(1);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            controller,
            monitor: None,
            monitor_alive: false,
            drift: DriftPoller::new(drift_period),
            signals_rx,
            commands_rx,
            timers_tx,
            timers_rx,
        };
        let handle = CoordinatorHandle {
            signals: signals_tx,
            commands: commands_tx,
        };
        (coordinator, handle)
    }

    /// Hand over the running monitor. Stopped when the loop exits.
    pub fn attach_monitor(&mut self, monitor: impl LinkEventSource + 'static) {
        self.monitor = Some(Box::new(monitor));
    }

    /// Whether the drift poller is currently ticking.
    pub fn drift_enabled(&self) -> bool {
        self.drift.is_enabled()
    }

    /// Run until [`Command::Shutdown`] or every command sender is dropped.
    ///
    /// Returns the controller so callers can inspect its final state.
    pub async fn run(mut self) -> EnforcementController {
        self.monitor_alive = self.monitor_running();
        if !self.monitor_alive {
            warn!("route event monitor unavailable, enforcing by polling only");
        }
        self.controller.set_monitor_running(self.monitor_alive);

        let wake = self.controller.startup();
        self.schedule(wake);
        self.sync_drift();

        loop {
            let wake = tokio::select! {
                Some(ChangeSignal) = self.signals_rx.recv() => {
                    debug!("change signal");
                    self.controller.on_change_signal()
                }
                Some(timer) = self.timers_rx.recv() => self.controller.on_timer(timer),
                () = self.drift.tick() => self.controller.on_drift_tick(),
                command = self.commands_rx.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
            };
            self.schedule(wake);
            self.sync_drift();
        }

        info!("coordinator shutting down");
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.controller
    }

    fn handle_command(&mut self, command: Command) -> Option<Wakeup> {
        debug!(?command, "command received");
        match command {
            Command::SetBlocking(enabled) => self.controller.set_blocking(enabled),
            Command::TogglePolicy => self.controller.toggle_policy(),
            Command::ToggleDebug => {
                self.controller.toggle_debug();
                None
            }
            Command::ReloadPolicy => self.controller.reload_policy(),
            Command::Shutdown => None,
        }
    }

    fn monitor_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_running())
    }

    /// Notice a monitor that aborted since the last check.
    fn check_monitor(&mut self) {
        let alive = self.monitor_running();
        if self.monitor_alive && !alive {
            warn!("route event monitor stopped, falling back to polling");
        }
        self.monitor_alive = alive;
        self.controller.set_monitor_running(alive);
    }

    /// Drift polling runs while debug is on or the monitor is gone.
    fn sync_drift(&mut self) {
        self.check_monitor();
        let enabled = self.controller.policy().debug_enabled || !self.monitor_alive;
        self.drift.set_enabled(enabled);
    }

    fn schedule(&self, wake: Option<Wakeup>) {
        let Some(Wakeup { after, timer }) = wake else {
            return;
        };
        let tx = self.timers_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if tx.send(timer).is_err() {
                debug!(?timer, "coordinator gone, dropping timer");
            }
        });
    }
}

/// Map process signals onto coordinator commands.
///
/// `SIGUSR1` toggles blocking, `SIGUSR2` toggles debug, `SIGHUP` reloads the
/// persisted policy, `SIGINT`/`SIGTERM` shut down.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub fn spawn_signal_listener(commands: mpsc::UnboundedSender<Command>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = usr1.recv() => Command::TogglePolicy,
                _ = usr2.recv() => Command::ToggleDebug,
                _ = hup.recv() => Command::ReloadPolicy,
                _ = term.recv() => Command::Shutdown,
                _ = int.recv() => Command::Shutdown,
            };
            info!(?command, "signal received");
            if commands.send(command).is_err() || command == Command::Shutdown {
                break;
            }
        }
    });
    Ok(())
}
