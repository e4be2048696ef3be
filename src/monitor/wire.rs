//! Routing-message parsing.
//!
//! Both dialects are compiled on every platform so they can be tested
//! anywhere; [`RouteDialect::native`] picks the one the running kernel speaks.
//! All integers are in native byte order. Netlink framing and `ifinfomsg`
//! decoding go through `netlink-packet-core` / `netlink-packet-route`; the
//! Darwin headers are read by offset.

use netlink_packet_core::{NetlinkBuffer, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;

/// Darwin `sizeof(struct rt_msghdr)`.
pub const DARWIN_RT_MSGHDR_LEN: usize = 92;
/// Darwin `sizeof(struct if_msghdr)`.
pub const DARWIN_IF_MSGHDR_LEN: usize = 112;
/// Darwin `RTM_IFINFO`.
pub const DARWIN_RTM_IFINFO: u8 = 0x0e;
const DARWIN_TYPE_OFFSET: usize = 3;
const DARWIN_IFM_INDEX_OFFSET: usize = 12;

/// `sizeof(struct nlmsghdr) + sizeof(struct ifinfomsg)`.
pub const NETLINK_LINK_MSG_LEN: usize = 32;
/// `RTM_NEWLINK`.
pub const RTM_NEWLINK: u16 = 16;
/// `RTM_DELLINK`.
pub const RTM_DELLINK: u16 = 17;
const NLMSG_ALIGNTO: usize = 4;

/// Layout of messages on the kernel routing channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDialect {
    /// `PF_ROUTE` messages (`rt_msghdr` / `if_msghdr`).
    Darwin,
    /// `NETLINK_ROUTE` messages (`nlmsghdr` / `ifinfomsg`).
    Netlink,
}

impl RouteDialect {
    /// Dialect spoken by the kernel this binary was built for.
    pub fn native() -> Self {
        if cfg!(target_os = "linux") || cfg!(target_os = "android") {
            Self::Netlink
        } else {
            Self::Darwin
        }
    }
}

/// Why a datagram did not count as a change for the target interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Interface-info message for the target index.
    Relevant,
    /// Shorter than the minimum header for its type.
    Malformed,
    /// Not an interface-info message.
    OtherType,
    /// Interface-info message for another interface.
    OtherInterface,
}

/// Decides whether routing datagrams concern one interface.
#[derive(Debug, Clone, Copy)]
pub struct DatagramFilter {
    dialect: RouteDialect,
    index: u32,
}

impl DatagramFilter {
    /// Filter for `index` in the given dialect.
    pub fn new(dialect: RouteDialect, index: u32) -> Self {
        Self { dialect, index }
    }

    /// Target interface index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Classify one datagram as read from the socket.
    ///
    /// A netlink datagram may pack several messages; it is relevant if any
    /// of them is. Otherwise the most specific rejection is reported.
    pub fn classify(&self, datagram: &[u8]) -> Verdict {
        match self.dialect {
            RouteDialect::Darwin => classify_darwin(datagram, self.index),
            RouteDialect::Netlink => classify_netlink(datagram, self.index),
        }
    }

    /// Shorthand for `classify(..) == Verdict::Relevant`.
    pub fn is_relevant(&self, datagram: &[u8]) -> bool {
        self.classify(datagram) == Verdict::Relevant
    }
}

fn classify_darwin(buf: &[u8], target: u32) -> Verdict {
    if buf.len() < DARWIN_RT_MSGHDR_LEN {
        return Verdict::Malformed;
    }
    if buf.get(DARWIN_TYPE_OFFSET).copied() != Some(DARWIN_RTM_IFINFO) {
        return Verdict::OtherType;
    }
    if buf.len() < DARWIN_IF_MSGHDR_LEN {
        return Verdict::Malformed;
    }
    match read_u16(buf, DARWIN_IFM_INDEX_OFFSET) {
        Some(index) if u32::from(index) == target => Verdict::Relevant,
        Some(_) => Verdict::OtherInterface,
        None => Verdict::Malformed,
    }
}

fn classify_netlink(buf: &[u8], target: u32) -> Verdict {
    let mut verdict = Verdict::Malformed;
    let mut offset = 0usize;

    while let Some(rest) = buf.get(offset..) {
        // Rejects short headers and lengths outside [header, remaining].
        let Ok(frame) = NetlinkBuffer::new_checked(rest) else {
            break;
        };
        let Ok(len) = usize::try_from(frame.length()) else {
            break;
        };
        let Some(message) = rest.get(..len) else {
            break;
        };

        let current = classify_netlink_message(frame.message_type(), message, target);
        if current == Verdict::Relevant {
            return current;
        }
        verdict = more_specific(verdict, current);

        let Some(next) = align_nlmsg(len).and_then(|step| offset.checked_add(step)) else {
            break;
        };
        offset = next;
    }

    verdict
}

fn classify_netlink_message(message_type: u16, message: &[u8], target: u32) -> Verdict {
    if !matches!(message_type, RTM_NEWLINK | RTM_DELLINK) {
        return Verdict::OtherType;
    }
    if message.len() < NETLINK_LINK_MSG_LEN {
        return Verdict::Malformed;
    }
    let Ok(decoded) = NetlinkMessage::<RouteNetlinkMessage>::deserialize(message) else {
        return Verdict::Malformed;
    };
    let index = match decoded.payload {
        NetlinkPayload::InnerMessage(
            RouteNetlinkMessage::NewLink(link) | RouteNetlinkMessage::DelLink(link),
        ) => link.header.index,
        _ => return Verdict::OtherType,
    };
    if index == target {
        Verdict::Relevant
    } else {
        Verdict::OtherInterface
    }
}

/// Rank rejections so a batch reports the closest miss.
fn more_specific(a: Verdict, b: Verdict) -> Verdict {
    fn rank(v: Verdict) -> u8 {
        match v {
            Verdict::Malformed => 0,
            Verdict::OtherType => 1,
            Verdict::OtherInterface => 2,
            Verdict::Relevant => 3,
        }
    }
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

fn align_nlmsg(len: usize) -> Option<usize> {
    let mask = NLMSG_ALIGNTO.saturating_sub(1);
    len.checked_add(mask).map(|l| l & !mask)
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let bytes: [u8; 2] = buf.get(offset..end)?.try_into().ok()?;
    Some(u16::from_ne_bytes(bytes))
}
