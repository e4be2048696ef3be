//! Tests for `src/monitor/wire.rs`.

use ifguard::monitor::wire::{
    DatagramFilter, RouteDialect, Verdict, DARWIN_IF_MSGHDR_LEN, DARWIN_RTM_IFINFO,
    DARWIN_RT_MSGHDR_LEN, RTM_DELLINK, RTM_NEWLINK,
};

use netlink_packet_route::RouteNetlinkMessage;

use crate::frames::{
    darwin, darwin_ifinfo, named_link, netlink_encoded, netlink_link, netlink_record,
};

const TARGET: u32 = 7;

fn darwin_filter() -> DatagramFilter {
    DatagramFilter::new(RouteDialect::Darwin, TARGET)
}

fn netlink_filter() -> DatagramFilter {
    DatagramFilter::new(RouteDialect::Netlink, TARGET)
}

#[test]
fn native_dialect_matches_platform() {
    if cfg!(target_os = "linux") {
        assert_eq!(RouteDialect::native(), RouteDialect::Netlink);
    } else if cfg!(target_os = "macos") {
        assert_eq!(RouteDialect::native(), RouteDialect::Darwin);
    }
}

#[test]
fn darwin_ifinfo_for_target_is_relevant() {
    assert!(darwin_filter().is_relevant(&darwin_ifinfo(7)));
}

#[test]
fn darwin_trailing_bytes_are_ignored() {
    let mut frame = darwin_ifinfo(7);
    frame.extend_from_slice(&[0xaa; 64]);
    assert!(darwin_filter().is_relevant(&frame));
}

#[test]
fn darwin_other_index_is_skipped() {
    assert_eq!(
        darwin_filter().classify(&darwin_ifinfo(8)),
        Verdict::OtherInterface
    );
}

#[test]
fn darwin_other_type_is_skipped() {
    // RTM_NEWADDR
    let frame = darwin(0x0c, 7, DARWIN_IF_MSGHDR_LEN);
    assert_eq!(darwin_filter().classify(&frame), Verdict::OtherType);
}

#[test]
fn darwin_below_rt_msghdr_is_malformed() {
    let frame = darwin(DARWIN_RTM_IFINFO, 7, DARWIN_RT_MSGHDR_LEN - 1);
    assert_eq!(darwin_filter().classify(&frame), Verdict::Malformed);
    assert_eq!(darwin_filter().classify(&[]), Verdict::Malformed);
}

#[test]
fn darwin_ifinfo_below_if_msghdr_is_malformed() {
    let frame = darwin(DARWIN_RTM_IFINFO, 7, DARWIN_IF_MSGHDR_LEN - 1);
    assert_eq!(darwin_filter().classify(&frame), Verdict::Malformed);
}

#[test]
fn netlink_newlink_and_dellink_are_relevant() {
    assert!(netlink_filter().is_relevant(&netlink_link(7)));
    assert!(netlink_filter().is_relevant(&netlink_record(RTM_DELLINK, 7, 32)));
}

#[test]
fn netlink_other_index_and_type_are_skipped() {
    assert_eq!(
        netlink_filter().classify(&netlink_link(3)),
        Verdict::OtherInterface
    );
    // RTM_NEWADDR
    assert_eq!(
        netlink_filter().classify(&netlink_record(20, 7, 32)),
        Verdict::OtherType
    );
}

#[test]
fn netlink_short_records_are_malformed() {
    assert_eq!(netlink_filter().classify(&[0u8; 8]), Verdict::Malformed);
    // Valid header, truncated ifinfomsg.
    let frame = netlink_record(RTM_NEWLINK, 7, 24);
    assert_eq!(netlink_filter().classify(&frame), Verdict::Malformed);
}

#[test]
fn netlink_length_beyond_datagram_stops_parsing() {
    let mut frame = netlink_link(7);
    frame.truncate(28);
    assert_eq!(netlink_filter().classify(&frame), Verdict::Malformed);
}

#[test]
fn netlink_zero_length_record_stops_parsing() {
    let mut frame = netlink_record(RTM_NEWLINK, 3, 32);
    frame[0..4].copy_from_slice(&0u32.to_ne_bytes());
    frame.extend(netlink_link(7));
    assert_eq!(netlink_filter().classify(&frame), Verdict::Malformed);
}

#[test]
fn netlink_batch_with_one_match_is_relevant() {
    let mut frame = netlink_link(3);
    frame.extend(netlink_record(20, 7, 32));
    frame.extend(netlink_link(7));
    assert!(netlink_filter().is_relevant(&frame));
}

#[test]
fn netlink_records_are_four_byte_aligned() {
    // 33-byte record padded to 36, then the target.
    let mut frame = netlink_record(RTM_NEWLINK, 3, 33);
    frame.extend_from_slice(&[0u8; 3]);
    frame.extend(netlink_link(7));
    assert!(netlink_filter().is_relevant(&frame));
}

#[test]
fn netlink_batch_without_match_reports_closest_miss() {
    let mut frame = netlink_record(20, 7, 32);
    frame.extend(netlink_link(3));
    assert_eq!(
        netlink_filter().classify(&frame),
        Verdict::OtherInterface
    );
}

#[test]
fn dialects_do_not_cross_match() {
    // A Darwin ifinfo frame read as netlink declares an absurd length.
    assert!(!netlink_filter().is_relevant(&darwin_ifinfo(7)));
}

#[test]
fn netlink_link_with_attributes_is_decoded() {
    let new = netlink_encoded(RouteNetlinkMessage::NewLink(named_link(7, "awdl0")));
    assert!(new.len() > 32);
    assert!(netlink_filter().is_relevant(&new));

    let gone = netlink_encoded(RouteNetlinkMessage::DelLink(named_link(7, "awdl0")));
    assert!(netlink_filter().is_relevant(&gone));

    let other = netlink_encoded(RouteNetlinkMessage::NewLink(named_link(3, "eth0")));
    assert_eq!(netlink_filter().classify(&other), Verdict::OtherInterface);
}

#[test]
fn netlink_encoded_batch_finds_target_after_neighbour() {
    let mut batch = netlink_encoded(RouteNetlinkMessage::NewLink(named_link(3, "eth0")));
    batch.extend(netlink_encoded(RouteNetlinkMessage::NewLink(named_link(7, "awdl0"))));
    assert!(netlink_filter().is_relevant(&batch));
}
