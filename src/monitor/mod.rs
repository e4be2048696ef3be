//! Kernel route event monitor.
//!
//! A dedicated thread waits on a raw routing socket and, whenever a drained
//! batch of datagrams mentions the target interface, posts one payload-free
//! [`ChangeSignal`] into a capacity-1 channel. Whoever receives it re-probes.

mod socket;
pub mod wire;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use self::wire::{DatagramFilter, RouteDialect};

/// Longest interface name the kernel accepts, including the trailing NUL.
const IFNAMSIZ: usize = 16;

/// Receive buffer size. Link messages with all attributes fit comfortably.
const RECV_BUF_LEN: usize = 16_384;

const THREAD_NAME: &str = "ifguard-monitor";

/// "The interface may have changed." Carries no state on purpose; the probe
/// decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSignal;

/// Name and kernel index of the watched interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIdentity {
    /// Interface name, e.g. `awdl0`.
    pub name: String,
    /// Kernel interface index resolved at start.
    pub index: u32,
}

/// Errors that prevent the monitor from starting.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The kernel does not know the interface.
    #[error("cannot resolve interface '{name}': {source}")]
    Resolution {
        /// Interface name that was looked up.
        name: String,
        /// Underlying errno.
        #[source]
        source: Errno,
    },

    /// The name can never be a valid interface name.
    #[error("invalid interface name '{0}'")]
    InvalidName(String),

    /// Opening or configuring the routing socket failed.
    #[error("routing socket setup failed: {0}")]
    Socket(#[source] Errno),

    /// The background thread could not be spawned.
    #[error("failed to spawn monitor thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Something that posts [`ChangeSignal`]s until it stops.
///
/// An implementation whose listener dies on its own must post one final
/// signal so the receiver notices the loss.
pub trait LinkEventSource: fmt::Debug {
    /// Whether signals may still arrive.
    fn is_running(&self) -> bool;

    /// Stop producing signals. Idempotent.
    fn stop(&mut self);
}

/// Background listener on the kernel routing channel.
#[derive(Debug)]
pub struct RouteEventMonitor {
    identity: InterfaceIdentity,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RouteEventMonitor {
    /// Resolve `name`, open the routing socket and start the listener thread.
    ///
    /// `poll_ms` bounds how long the thread waits before re-checking whether
    /// it has been asked to stop.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError`] if the name is invalid or unknown, the
    /// socket cannot be set up, or the thread cannot be spawned.
    pub fn start(
        name: &str,
        poll_ms: u16,
        signals: mpsc::Sender<ChangeSignal>,
    ) -> Result<Self, MonitorError> {
        if name.is_empty() || name.len() >= IFNAMSIZ || name.contains('\0') {
            return Err(MonitorError::InvalidName(name.to_owned()));
        }

        let index =
            nix::net::if_::if_nametoindex(name).map_err(|source| MonitorError::Resolution {
                name: name.to_owned(),
                source,
            })?;

        let fd = socket::open_route_socket().map_err(MonitorError::Socket)?;
        socket::set_nonblocking(&fd).map_err(MonitorError::Socket)?;
        let file = File::from(fd);

        let identity = InterfaceIdentity {
            name: name.to_owned(),
            index,
        };
        let filter = DatagramFilter::new(RouteDialect::native(), index);
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name(THREAD_NAME.to_owned())
                .spawn(move || listen(&file, filter, poll_ms, &running, &signals))
                .map_err(MonitorError::Spawn)?
        };

        info!(interface = %identity.name, index, "route event monitor started");

        Ok(Self {
            identity,
            running,
            handle: Some(handle),
        })
    }

    /// Interface this monitor watches.
    pub fn identity(&self) -> &InterfaceIdentity {
        &self.identity
    }
}

impl LinkEventSource for RouteEventMonitor {
    /// `false` after `stop()` or after the loop aborted on a read error.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the thread to exit and wait for it.
    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(interface = %self.identity.name, "monitor thread panicked");
            }
            debug!(interface = %self.identity.name, "route event monitor stopped");
        }
    }
}

impl Drop for RouteEventMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How a drain pass ended.
#[derive(Debug)]
pub enum DrainEnd {
    /// No more datagrams pending.
    Exhausted,
    /// Unrecoverable read error; the listener must stop.
    Fatal(io::Error),
}

/// Result of reading every pending datagram.
#[derive(Debug)]
pub struct DrainOutcome {
    /// Datagrams about the target interface.
    pub relevant: usize,
    /// Datagrams discarded as short, foreign, or for another interface.
    pub skipped: usize,
    /// Why the pass stopped.
    pub end: DrainEnd,
}

impl DrainOutcome {
    /// Whether this pass warrants a change signal.
    pub fn should_signal(&self) -> bool {
        self.relevant > 0
    }
}

/// Read datagrams until the reader would block, classifying each one.
///
/// `Interrupted` reads are retried. A zero-length read ends the pass.
pub fn drain<R: Read>(reader: &mut R, buf: &mut [u8], filter: &DatagramFilter) -> DrainOutcome {
    let mut relevant = 0usize;
    let mut skipped = 0usize;

    let end = loop {
        match reader.read(buf) {
            Ok(0) => break DrainEnd::Exhausted,
            Ok(n) => {
                let datagram = buf.get(..n).unwrap_or(&[]);
                let verdict = filter.classify(datagram);
                if verdict == wire::Verdict::Relevant {
                    relevant = relevant.saturating_add(1);
                } else {
                    trace!(len = n, verdict = ?verdict, "skipping routing datagram");
                    skipped = skipped.saturating_add(1);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break DrainEnd::Exhausted,
            Err(e) => break DrainEnd::Fatal(e),
        }
    };

    DrainOutcome {
        relevant,
        skipped,
        end,
    }
}

fn listen(
    file: &File,
    filter: DatagramFilter,
    poll_ms: u16,
    running: &AtomicBool,
    signals: &mpsc::Sender<ChangeSignal>,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    let mut reader = file;

    while running.load(Ordering::Acquire) {
        let ready = {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(poll_ms))
        };
        match ready {
            Ok(0) => continue,
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, index = filter.index(), "poll on routing socket failed, monitor stopping");
                break;
            }
        }

        let outcome = drain(&mut reader, &mut buf, &filter);
        if outcome.should_signal() {
            trace!(relevant = outcome.relevant, skipped = outcome.skipped, "link change batch");
            match signals.try_send(ChangeSignal) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!("signal receiver gone, monitor stopping");
                    break;
                }
            }
        }
        if let DrainEnd::Fatal(e) = outcome.end {
            warn!(error = %e, index = filter.index(), "routing socket read failed, monitor stopping");
            break;
        }
    }

    // Still flagged as running means nobody asked us to stop: wake the
    // receiver so it sees the monitor is gone.
    if running.swap(false, Ordering::AcqRel) {
        let _ = signals.try_send(ChangeSignal);
    }
}
