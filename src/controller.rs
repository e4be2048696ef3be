//! Enforcement state machine.
//!
//! The controller owns the policy, the cached interface state and the
//! current enforcement episode. It never sleeps: every method that needs a
//! delayed follow-up returns a [`Wakeup`], and the coordinator later feeds
//! the carried [`Timer`] back through [`EnforcementController::on_timer`].
//!
//! Each timer carries the chain generation it was scheduled under. Any
//! transition that ends or replaces a chain bumps the generation, so timers
//! from an older chain are ignored when they fire.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::executor::{ToggleAction, ToggleExecutor};
use crate::policy::{PolicyFlags, PolicyStore};
use crate::probe::{InterfaceState, InterfaceStateProbe};
use crate::status::{status_title, StatusSink, StatusSnapshot};

/// Why a disable chain was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    /// The interface went from down to up.
    InterfaceRevived,
    /// Blocking was switched on while the interface was up.
    PolicyEnabled,
    /// The interface was already up when the daemon started.
    Startup,
    /// The drift poller found the interface up.
    DriftPoll,
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InterfaceRevived => "interface_revived",
            Self::PolicyEnabled => "policy_enabled",
            Self::Startup => "startup",
            Self::DriftPoll => "drift_poll",
        })
    }
}

/// What the controller is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementState {
    /// Blocking is off.
    Idle,
    /// Blocking is on and nothing needs doing.
    Monitoring,
    /// A disable chain is in flight.
    Disabling {
        /// 1-based attempt number.
        attempt: u32,
        /// What started the chain.
        reason: DisableReason,
    },
    /// A single re-enable is awaiting confirmation.
    Enabling,
}

impl EnforcementState {
    /// Lowercase name used in logs and the status file.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Disabling { .. } => "disabling",
            Self::Enabling => "enabling",
        }
    }

    /// Whether a disable chain is in flight.
    pub fn is_disabling(&self) -> bool {
        matches!(self, Self::Disabling { .. })
    }
}

/// Deferred step, tagged with the chain it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Re-probe after a `down` toggle.
    DisableSettle {
        /// Chain generation.
        chain: u64,
    },
    /// Try `down` again.
    DisableRetry {
        /// Chain generation.
        chain: u64,
    },
    /// Re-probe after the single `up` toggle.
    EnableSettle {
        /// Chain generation.
        chain: u64,
        /// Whether the interface was down before the toggle.
        was_down: bool,
    },
}

impl Timer {
    /// Chain generation the timer was scheduled under.
    pub fn chain(&self) -> u64 {
        match *self {
            Self::DisableSettle { chain }
            | Self::DisableRetry { chain }
            | Self::EnableSettle { chain, .. } => chain,
        }
    }
}

/// Request to deliver `timer` back to the controller after `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    /// Delay before delivery.
    pub after: Duration,
    /// Value to deliver.
    pub timer: Timer,
}

/// Outcomes reported to the [`StatusSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementEvent {
    /// `down` is about to be invoked.
    DisableRequested {
        /// Attempt number.
        attempt: u32,
        /// Chain trigger.
        reason: DisableReason,
    },
    /// The probe confirmed the interface down. Reported once per episode.
    Disabled {
        /// Attempts it took.
        attempts: u32,
    },
    /// The probe still saw the interface up after a `down`.
    StillUp {
        /// Attempt that did not take.
        attempt: u32,
    },
    /// A chain was dropped because blocking was switched off.
    Abandoned {
        /// Last attempt made.
        attempt: u32,
    },
    /// The interface is up after the `up` toggle.
    Enabled,
    /// The interface is still down after the `up` toggle.
    EnableFailed,
    /// The drift poller found the cached state wrong.
    DriftCorrected {
        /// Cached state.
        from: InterfaceState,
        /// Probed state.
        to: InterfaceState,
    },
    /// The helper failed.
    ToggleFailed {
        /// Requested action.
        action: ToggleAction,
        /// Error text.
        error: String,
    },
}

impl fmt::Display for EnforcementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisableRequested { attempt, reason } => {
                write!(f, "disable requested (attempt {attempt}, {reason})")
            }
            Self::Disabled { attempts } => {
                write!(f, "disabled successfully after {attempts} attempt(s)")
            }
            Self::StillUp { attempt } => write!(f, "still up after attempt {attempt}"),
            Self::Abandoned { attempt } => write!(f, "abandoned after attempt {attempt}"),
            Self::Enabled => f.write_str("enabled successfully"),
            Self::EnableFailed => f.write_str("still down after enable"),
            Self::DriftCorrected { from, to } => write!(f, "drift corrected ({from} -> {to})"),
            Self::ToggleFailed { action, error } => write!(f, "helper '{action}' failed: {error}"),
        }
    }
}

/// Drives the interface toward the policy.
pub struct EnforcementController {
    interface: String,
    settle: Duration,
    retry: Duration,
    probe: Box<dyn InterfaceStateProbe>,
    executor: Box<dyn ToggleExecutor>,
    store: Box<dyn PolicyStore>,
    sink: Box<dyn StatusSink>,
    policy: PolicyFlags,
    state: EnforcementState,
    observed: InterfaceState,
    chain: u64,
    success_logged: bool,
    monitor_running: bool,
}

impl EnforcementController {
    /// Build a controller. Call [`startup`](Self::startup) before anything else.
    pub fn new(
        interface: String,
        timing: &TimingConfig,
        probe: Box<dyn InterfaceStateProbe>,
        executor: Box<dyn ToggleExecutor>,
        store: Box<dyn PolicyStore>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        Self {
            interface,
            settle: timing.settle(),
            retry: timing.retry(),
            probe,
            executor,
            store,
            sink,
            policy: PolicyFlags::default(),
            state: EnforcementState::Idle,
            observed: InterfaceState::Down,
            chain: 0,
            success_logged: false,
            monitor_running: false,
        }
    }

    /// Load the policy, take a first probe and start enforcing if needed.
    pub fn startup(&mut self) -> Option<Wakeup> {
        // Unreadable store: both flags off.
        self.policy = self.load_policy().unwrap_or_default();
        self.observed = self.probe.query();
        self.state = if self.policy.blocking_enabled {
            EnforcementState::Monitoring
        } else {
            EnforcementState::Idle
        };

        info!(
            interface = %self.interface,
            state = %self.observed,
            blocking = self.policy.blocking_enabled,
            debug = self.policy.debug_enabled,
            "controller started"
        );
        self.refresh();

        if self.policy.blocking_enabled && self.observed.is_up() {
            return self.begin_disable(DisableReason::Startup);
        }
        None
    }

    /// The monitor said the interface may have changed: probe and react.
    pub fn on_change_signal(&mut self) -> Option<Wakeup> {
        let state = self.probe.query();
        self.on_state_change(state)
    }

    /// React to a freshly probed state.
    ///
    /// Only a down-to-up transition starts a new episode.
    pub fn on_state_change(&mut self, state: InterfaceState) -> Option<Wakeup> {
        let prev = self.observe(state);

        match state {
            InterfaceState::Up if prev.is_down() => {
                self.success_logged = false;
                info!(interface = %self.interface, "interface came up");
                if self.policy.blocking_enabled {
                    self.begin_disable(DisableReason::InterfaceRevived)
                } else {
                    None
                }
            }
            InterfaceState::Up => None,
            InterfaceState::Down => {
                if self.state.is_disabling() {
                    self.complete_disable();
                }
                None
            }
        }
    }

    /// A previously returned [`Wakeup`] has elapsed.
    pub fn on_timer(&mut self, timer: Timer) -> Option<Wakeup> {
        if timer.chain() != self.chain {
            debug!(chain = timer.chain(), current = self.chain, "ignoring stale timer");
            return None;
        }

        match timer {
            Timer::DisableSettle { .. } => self.on_disable_settle(),
            Timer::DisableRetry { .. } => self.on_disable_retry(),
            Timer::EnableSettle { was_down, .. } => self.on_enable_settle(was_down),
        }
    }

    /// Periodic fallback probe.
    ///
    /// Corrects the cached state when it disagrees, and starts a disable
    /// when the interface is up under blocking, without requiring a
    /// down-to-up transition.
    pub fn on_drift_tick(&mut self) -> Option<Wakeup> {
        let state = self.probe.query();
        if state != self.observed {
            info!(
                interface = %self.interface,
                from = %self.observed,
                to = %state,
                "drift detected"
            );
            self.sink.record(&EnforcementEvent::DriftCorrected {
                from: self.observed,
                to: state,
            });
        }
        let prev = self.observe(state);

        match state {
            InterfaceState::Down => {
                if self.state.is_disabling() {
                    self.complete_disable();
                }
                None
            }
            InterfaceState::Up => {
                if prev.is_down() {
                    self.success_logged = false;
                }
                if self.policy.blocking_enabled {
                    self.begin_disable(DisableReason::DriftPoll)
                } else {
                    None
                }
            }
        }
    }

    /// Switch blocking on or off and persist the choice.
    ///
    /// On: disables the interface if it is up. Off: abandons any chain and
    /// invokes `up` exactly once.
    pub fn set_blocking(&mut self, enabled: bool) -> Option<Wakeup> {
        self.apply_blocking(enabled, true)
    }

    /// Flip blocking.
    pub fn toggle_policy(&mut self) -> Option<Wakeup> {
        self.set_blocking(!self.policy.blocking_enabled)
    }

    /// Flip the debug flag, persist it, and return the new value.
    pub fn toggle_debug(&mut self) -> bool {
        self.policy.debug_enabled = !self.policy.debug_enabled;
        info!(debug = self.policy.debug_enabled, "debug mode toggled");
        self.persist_policy();
        self.refresh();
        self.policy.debug_enabled
    }

    /// Re-read the persisted policy and apply it.
    ///
    /// A store failure keeps the current policy.
    pub fn reload_policy(&mut self) -> Option<Wakeup> {
        let loaded = self.load_policy()?;
        info!(
            blocking = loaded.blocking_enabled,
            debug = loaded.debug_enabled,
            "policy reloaded"
        );
        if loaded.debug_enabled != self.policy.debug_enabled {
            self.policy.debug_enabled = loaded.debug_enabled;
            self.refresh();
        }
        self.apply_blocking(loaded.blocking_enabled, false)
    }

    /// Record whether the kernel event monitor is alive.
    pub fn set_monitor_running(&mut self, running: bool) {
        if self.monitor_running != running {
            self.monitor_running = running;
            self.refresh();
        }
    }

    /// Current policy.
    pub fn policy(&self) -> PolicyFlags {
        self.policy
    }

    /// Current enforcement state.
    pub fn state(&self) -> EnforcementState {
        self.state
    }

    /// Last probed interface state.
    pub fn observed(&self) -> InterfaceState {
        self.observed
    }

    /// Build the status view.
    pub fn snapshot(&self) -> StatusSnapshot {
        let up = self.observed.is_up();
        let blocking = self.policy.blocking_enabled;
        StatusSnapshot {
            interface: self.interface.clone(),
            interface_up: up,
            blocking_enabled: blocking,
            debug_enabled: self.policy.debug_enabled,
            state: self.state.name().to_owned(),
            attempt: match self.state {
                EnforcementState::Disabling { attempt, .. } => Some(attempt),
                _ => None,
            },
            monitor_running: self.monitor_running,
            title: status_title(&self.interface, up, blocking),
            warning: (up && blocking).then(|| format!("{} came up, disabling", self.interface)),
            last_event: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn apply_blocking(&mut self, enabled: bool, persist: bool) -> Option<Wakeup> {
        if enabled == self.policy.blocking_enabled {
            return None;
        }
        self.policy.blocking_enabled = enabled;
        if persist {
            self.persist_policy();
        }
        self.next_chain();

        if enabled {
            info!(interface = %self.interface, "blocking enabled");
            self.state = EnforcementState::Monitoring;
            let state = self.probe.query();
            self.observe(state);
            self.refresh();
            if state.is_up() {
                return self.begin_disable(DisableReason::PolicyEnabled);
            }
            return None;
        }

        info!(interface = %self.interface, "blocking disabled, re-enabling interface");
        if let EnforcementState::Disabling { attempt, .. } = self.state {
            debug!(attempt, "blocking off, abandoning disable chain");
            self.sink.record(&EnforcementEvent::Abandoned { attempt });
        }
        let was_down = self.observed.is_down();
        self.state = EnforcementState::Enabling;
        self.invoke(ToggleAction::Up);
        self.refresh();
        Some(Wakeup {
            after: self.settle,
            timer: Timer::EnableSettle {
                chain: self.chain,
                was_down,
            },
        })
    }

    fn begin_disable(&mut self, reason: DisableReason) -> Option<Wakeup> {
        if !self.policy.blocking_enabled {
            return None;
        }
        if let EnforcementState::Disabling { attempt, .. } = self.state {
            debug!(attempt, %reason, "disable already in progress");
            return None;
        }
        self.next_chain();
        self.state = EnforcementState::Disabling { attempt: 1, reason };
        self.run_disable()
    }

    fn run_disable(&mut self) -> Option<Wakeup> {
        let EnforcementState::Disabling { attempt, reason } = self.state else {
            return None;
        };

        info!(interface = %self.interface, attempt, %reason, "disabling interface");
        self.sink
            .record(&EnforcementEvent::DisableRequested { attempt, reason });
        self.invoke(ToggleAction::Down);
        self.refresh();

        Some(Wakeup {
            after: self.settle,
            timer: Timer::DisableSettle { chain: self.chain },
        })
    }

    fn on_disable_settle(&mut self) -> Option<Wakeup> {
        let EnforcementState::Disabling { attempt, .. } = self.state else {
            return None;
        };

        let state = self.probe.query();
        self.observe(state);

        if state.is_down() {
            self.complete_disable();
            return None;
        }

        warn!(interface = %self.interface, attempt, "interface still up, will retry");
        self.sink.record(&EnforcementEvent::StillUp { attempt });
        Some(Wakeup {
            after: self.retry,
            timer: Timer::DisableRetry { chain: self.chain },
        })
    }

    fn on_disable_retry(&mut self) -> Option<Wakeup> {
        let EnforcementState::Disabling { attempt, reason } = self.state else {
            return None;
        };

        self.state = EnforcementState::Disabling {
            attempt: attempt.saturating_add(1),
            reason,
        };
        self.run_disable()
    }

    fn on_enable_settle(&mut self, was_down: bool) -> Option<Wakeup> {
        if self.state != EnforcementState::Enabling {
            return None;
        }

        let state = self.probe.query();
        self.observe(state);
        self.state = EnforcementState::Idle;

        if state.is_up() {
            if was_down {
                info!(interface = %self.interface, "interface enabled successfully");
            } else {
                debug!(interface = %self.interface, "interface was already up");
            }
            self.sink.record(&EnforcementEvent::Enabled);
        } else {
            warn!(interface = %self.interface, "interface still down after enable");
            self.sink.record(&EnforcementEvent::EnableFailed);
        }
        self.next_chain();
        self.refresh();
        None
    }

    /// Confirmed down while disabling: end the chain.
    fn complete_disable(&mut self) {
        let EnforcementState::Disabling { attempt, .. } = self.state else {
            return;
        };
        if !self.success_logged {
            info!(interface = %self.interface, attempts = attempt, "interface disabled successfully");
            self.sink
                .record(&EnforcementEvent::Disabled { attempts: attempt });
            self.success_logged = true;
        }
        self.state = EnforcementState::Monitoring;
        self.next_chain();
        self.refresh();
    }

    fn invoke(&mut self, action: ToggleAction) {
        if let Err(e) = self.executor.run(action) {
            warn!(interface = %self.interface, action = %action, error = %e, "toggle failed");
            self.sink.record(&EnforcementEvent::ToggleFailed {
                action,
                error: e.to_string(),
            });
        }
    }

    /// Update the cache, returning the previous value.
    fn observe(&mut self, state: InterfaceState) -> InterfaceState {
        let prev = std::mem::replace(&mut self.observed, state);
        if prev != state {
            debug!(interface = %self.interface, from = %prev, to = %state, "interface state changed");
            self.refresh();
        }
        prev
    }

    fn next_chain(&mut self) {
        self.chain = self.chain.wrapping_add(1);
    }

    fn load_policy(&self) -> Option<PolicyFlags> {
        match self.store.load() {
            Ok(flags) => Some(flags),
            Err(e) => {
                warn!(error = %e, "failed to load policy");
                None
            }
        }
    }

    fn persist_policy(&self) {
        if let Err(e) = self.store.save(&self.policy) {
            warn!(error = %e, "failed to persist policy");
        }
    }

    fn refresh(&mut self) {
        let snapshot = self.snapshot();
        self.sink.refresh(&snapshot);
    }
}

impl fmt::Debug for EnforcementController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnforcementController")
            .field("interface", &self.interface)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("observed", &self.observed)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}
