//! Stateless frame codec for the built-in TCP/IP stack.
//!
//! Pure parse/serialize over byte slices for Ethernet, ARP, IPv4, ICMP echo,
//! UDP, TCP and BOOTP/DHCP, plus the one's-complement Internet checksum.
//! Nothing in this crate performs I/O or holds state; the stack and the
//! tests are the only consumers.
#![forbid(unsafe_code)]

pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod udp;

pub use arp::{ArpOperation, ArpPacket};
pub use dhcp::{DhcpMessage, DhcpMessageType, DhcpOptions, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
pub use ethernet::{EtherType, EthernetFrame, MacAddr};
pub use icmp::IcmpEcho;
pub use ipv4::{Ipv4Packet, Ipv4Protocol};
pub use tcp::{TcpFlags, TcpSegment, TcpSegmentBuilder};
pub use udp::{UdpDatagram, UdpDatagramBuilder};

use thiserror::Error;

/// Decode failure. Offending frames are dropped by the caller; no variant
/// here ever maps to a connection-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated packet")]
    Truncated,
    #[error("bad checksum")]
    BadChecksum,
    #[error("{0}")]
    Invalid(&'static str),
}
