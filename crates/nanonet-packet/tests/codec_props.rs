//! Property tests over the wire codecs: round-trips preserve every field,
//! and the one's-complement checksum catches any single-bit corruption
//! outside the checksum field itself.

use core::net::Ipv4Addr;
use nanonet_packet::{
    EtherType, EthernetFrame, Ipv4Packet, Ipv4Protocol, MacAddr, TcpFlags, TcpSegment,
    TcpSegmentBuilder, UdpDatagram, UdpDatagramBuilder,
};
use proptest::prelude::*;

fn ip() -> impl Strategy<Value = Ipv4Addr> {
    any::<[u8; 4]>().prop_map(|o| Ipv4Addr::new(o[0], o[1], o[2], o[3]))
}

fn mac() -> impl Strategy<Value = MacAddr> {
    any::<[u8; 6]>().prop_map(MacAddr)
}

fn payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..256)
}

proptest! {
    #[test]
    fn ethernet_roundtrip(dst in mac(), src in mac(), et in any::<u16>(), body in payload()) {
        let bytes = EthernetFrame::serialize(dst, src, et, &body);
        let frame = EthernetFrame::parse(&bytes).unwrap();
        prop_assert_eq!(frame.dst, dst);
        prop_assert_eq!(frame.src, src);
        prop_assert_eq!(frame.ethertype, et);
        prop_assert_eq!(frame.payload, &body[..]);
    }

    #[test]
    fn ipv4_roundtrip(src in ip(), dst in ip(), proto in any::<u8>(), ttl in 1u8.., body in payload()) {
        let bytes = Ipv4Packet::serialize(src, dst, proto, ttl, &body);
        let pkt = Ipv4Packet::parse(&bytes).unwrap();
        prop_assert_eq!(pkt.src, src);
        prop_assert_eq!(pkt.dst, dst);
        prop_assert_eq!(pkt.protocol, proto);
        prop_assert_eq!(pkt.ttl, ttl);
        prop_assert_eq!(pkt.payload, &body[..]);
        prop_assert!(!pkt.is_fragment);
    }

    #[test]
    fn ipv4_header_bitflip_detected(src in ip(), dst in ip(), bit in 0usize..160) {
        let byte = bit / 8;
        // skip the checksum field itself
        prop_assume!(!(10..12).contains(&byte));
        let mut bytes = Ipv4Packet::serialize(src, dst, Ipv4Protocol::UDP, 64, b"data");
        bytes[byte] ^= 1 << (bit % 8);
        let r = Ipv4Packet::parse(&bytes);
        prop_assert!(r.is_err(), "corrupted header parsed: {:?}", r);
    }

    #[test]
    fn udp_roundtrip_and_bitflip(
        src in ip(), dst in ip(),
        sp in 1u16.., dp in 1u16..,
        body in proptest::collection::vec(any::<u8>(), 1..128),
        flip in any::<prop::sample::Index>(),
    ) {
        let bytes = UdpDatagramBuilder { src, dst, src_port: sp, dst_port: dp, payload: &body }.build_vec();
        let dgram = UdpDatagram::parse(&bytes).unwrap();
        prop_assert_eq!(dgram.src_port(), sp);
        prop_assert_eq!(dgram.dst_port(), dp);
        prop_assert_eq!(dgram.payload(), &body[..]);
        prop_assert!(dgram.checksum_valid_ipv4(src, dst));

        let mut corrupt = bytes.clone();
        let idx = 8 + flip.index(body.len());
        corrupt[idx] ^= 1 << flip.index(8);
        prop_assert!(!UdpDatagram::parse(&corrupt).unwrap().checksum_valid_ipv4(src, dst));
    }

    #[test]
    fn tcp_roundtrip_and_bitflip(
        src in ip(), dst in ip(),
        sp in 1u16.., dp in 1u16..,
        seq in any::<u32>(), ack in any::<u32>(),
        window in any::<u16>(),
        body in proptest::collection::vec(any::<u8>(), 1..128),
        flip in any::<prop::sample::Index>(),
    ) {
        let bytes = TcpSegmentBuilder {
            src, dst, src_port: sp, dst_port: dp, seq, ack,
            flags: TcpFlags::PSH | TcpFlags::ACK,
            window, mss: None, payload: &body,
        }.build_vec();
        let seg = TcpSegment::parse(&bytes).unwrap();
        prop_assert_eq!(seg.src_port(), sp);
        prop_assert_eq!(seg.dst_port(), dp);
        prop_assert_eq!(seg.seq(), seq);
        prop_assert_eq!(seg.ack(), ack);
        prop_assert_eq!(seg.window(), window);
        prop_assert_eq!(seg.payload(), &body[..]);
        prop_assert!(seg.checksum_valid_ipv4(src, dst));

        let mut corrupt = bytes.clone();
        let idx = 20 + flip.index(body.len());
        corrupt[idx] ^= 1 << flip.index(8);
        prop_assert!(!TcpSegment::parse(&corrupt).unwrap().checksum_valid_ipv4(src, dst));
    }

    #[test]
    fn truncation_never_panics(
        body in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let _ = EthernetFrame::parse(&body);
        let _ = Ipv4Packet::parse(&body);
        let _ = TcpSegment::parse(&body);
        let _ = UdpDatagram::parse(&body);
        let _ = nanonet_packet::ArpPacket::parse(&body);
        let _ = nanonet_packet::DhcpMessage::parse(&body);
        let _ = nanonet_packet::IcmpEcho::parse(&body);
    }

    #[test]
    fn ethertype_constants_stable(dst in mac(), src in mac()) {
        let bytes = EthernetFrame::serialize(dst, src, EtherType::ARP, &[]);
        prop_assert_eq!(&bytes[12..14], &[0x08, 0x06]);
    }
}
