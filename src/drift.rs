//! Fallback polling.
//!
//! Route events can be missed (socket overrun, monitor down). The drift
//! poller gives the coordinator a periodic nudge to re-probe while enabled.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Switchable periodic tick.
#[derive(Debug)]
pub struct DriftPoller {
    period: Duration,
    interval: Option<Interval>,
}

impl DriftPoller {
    /// Disabled poller that will tick every `period` once enabled.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Poll period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether ticks are being produced.
    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Start or stop ticking. The first tick comes one full period after
    /// enabling.
    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.interval.is_some()) {
            (true, false) => {
                let mut interval = match Instant::now().checked_add(self.period) {
                    Some(start) => tokio::time::interval_at(start, self.period),
                    None => tokio::time::interval(self.period),
                };
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.interval = Some(interval);
                debug!(period_secs = self.period.as_secs(), "drift poller enabled");
            }
            (false, true) => {
                self.interval = None;
                debug!("drift poller disabled");
            }
            _ => {}
        }
    }

    /// Wait for the next tick. Never completes while disabled.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
