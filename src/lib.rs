//! ifguard: keeps a network interface administratively down.
//!
//! A background thread listens on the kernel routing channel for link
//! events about one interface. Each batch of relevant events triggers a
//! fresh probe; if the interface is up while blocking is enabled, a
//! privileged helper takes it down, retrying until the probe confirms it.
//! A drift poller covers missed events.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod executor;
pub mod monitor;
pub mod probe;

pub mod controller;
pub mod coordinator;
pub mod drift;

pub mod pidfile;
pub mod policy;
pub mod status;
