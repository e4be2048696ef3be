//! Tests for draining and coalescing in `src/monitor/mod.rs`.

use std::collections::VecDeque;
use std::io::{self, Read};

use ifguard::monitor::wire::{DatagramFilter, RouteDialect};
use ifguard::monitor::{drain, DrainEnd};

use crate::frames::{netlink_link, netlink_record};

/// Replays datagrams, then reports `WouldBlock` like an empty socket.
struct ScriptedSocket {
    reads: VecDeque<io::Result<Vec<u8>>>,
}

impl ScriptedSocket {
    fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
        Self {
            reads: reads.into(),
        }
    }
}

impl Read for ScriptedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(Ok(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

fn filter() -> DatagramFilter {
    DatagramFilter::new(RouteDialect::Netlink, 7)
}

fn run(reads: Vec<io::Result<Vec<u8>>>) -> ifguard::monitor::DrainOutcome {
    let mut socket = ScriptedSocket::new(reads);
    let mut buf = vec![0u8; 4096];
    drain(&mut socket, &mut buf, &filter())
}

#[test]
fn batch_with_matches_signals_once() {
    let outcome = run(vec![
        Ok(netlink_link(3)),
        Ok(netlink_link(7)),
        Ok(netlink_link(7)),
        Ok(netlink_record(20, 7, 32)),
    ]);

    assert_eq!(outcome.relevant, 2);
    assert_eq!(outcome.skipped, 2);
    assert!(outcome.should_signal());
    assert!(matches!(outcome.end, DrainEnd::Exhausted));
}

#[test]
fn batch_without_matches_never_signals() {
    let outcome = run(vec![
        Ok(netlink_link(3)),
        Ok(netlink_record(20, 7, 32)),
        Ok(vec![0u8; 10]),
    ]);

    assert_eq!(outcome.relevant, 0);
    assert_eq!(outcome.skipped, 3);
    assert!(!outcome.should_signal());
}

#[test]
fn drain_reads_every_pending_datagram() {
    let reads = (0..50).map(|_| Ok(netlink_link(3))).collect();
    let outcome = run(reads);
    assert_eq!(outcome.skipped, 50);
}

#[test]
fn interrupted_read_is_retried() {
    let outcome = run(vec![
        Err(io::ErrorKind::Interrupted.into()),
        Ok(netlink_link(7)),
    ]);
    assert_eq!(outcome.relevant, 1);
    assert!(matches!(outcome.end, DrainEnd::Exhausted));
}

#[test]
fn hard_error_is_fatal_but_keeps_earlier_matches() {
    let outcome = run(vec![
        Ok(netlink_link(7)),
        Err(io::Error::other("socket gone")),
        Ok(netlink_link(7)),
    ]);
    assert_eq!(outcome.relevant, 1);
    assert!(outcome.should_signal());
    assert!(matches!(outcome.end, DrainEnd::Fatal(_)));
}

#[test]
fn empty_socket_is_quiet() {
    let outcome = run(Vec::new());
    assert_eq!(outcome.relevant, 0);
    assert_eq!(outcome.skipped, 0);
    assert!(matches!(outcome.end, DrainEnd::Exhausted));
}
