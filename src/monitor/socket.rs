//! Kernel routing socket setup.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

/// Netlink multicast group for link state changes (`RTMGRP_LINK`).
#[cfg(any(target_os = "linux", target_os = "android"))]
const RTMGRP_LINK: u32 = 1;

/// Open a raw routing socket subscribed to link events.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn open_route_socket() -> nix::Result<OwnedFd> {
    use nix::sys::socket::{bind, NetlinkAddr, SockProtocol};

    let fd = socket(
        AddressFamily::Netlink,
        SockType::Raw,
        SockFlag::SOCK_CLOEXEC,
        SockProtocol::NetlinkRoute,
    )?;
    bind(fd.as_raw_fd(), &NetlinkAddr::new(0, RTMGRP_LINK))?;
    Ok(fd)
}

/// Open a raw routing socket. `PF_ROUTE` delivers every routing message.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn open_route_socket() -> nix::Result<OwnedFd> {
    socket(
        AddressFamily::Route,
        SockType::Raw,
        SockFlag::empty(),
        None::<nix::sys::socket::SockProtocol>,
    )
}

/// Put the socket into non-blocking mode so a drain ends on `EAGAIN`.
pub(crate) fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}
