//! Network interface: owns the link driver, the ARP cache and the DHCP
//! client, and moves whole frames. ARP, ICMP echo and DHCP terminate here;
//! UDP and TCP payloads are handed up to the connection manager.

use crate::arp::ArpCache;
use crate::dhcp::{DhcpClient, DhcpEvent, DhcpOutput, Lease};
use crate::Millis;
use core::net::Ipv4Addr;
use nanonet_driver::LinkDriver;
use nanonet_packet::{
    ArpOperation, ArpPacket, DhcpMessage, EtherType, EthernetFrame, IcmpEcho, Ipv4Packet,
    Ipv4Protocol, MacAddr, UdpDatagram, UdpDatagramBuilder, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
use rand::Rng;
use tracing::{debug, info, trace, warn};

const HOUSEKEEP_INTERVAL: Millis = 1_000;
const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No carrier.
    Down,
    /// Carrier present, no address yet.
    Up,
    /// DHCP negotiation in progress.
    Requesting,
    /// Address configured, gateway not yet resolved.
    HaveIp,
    /// Fully operational.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddr {
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub enum IpConfig {
    Static(StaticAddr),
    Dhcp {
        /// Adopted if no lease arrives within `fallback_after` of link-up.
        fallback: Option<StaticAddr>,
        fallback_after: Millis,
    },
}

#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    /// Random locally-administered address when absent.
    pub mac: Option<MacAddr>,
    pub ip: IpConfig,
    pub mtu: usize,
    pub hostname: Option<String>,
    /// Frames drained from the driver per poll.
    pub rx_budget: usize,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            mac: None,
            ip: IpConfig::Dhcp {
                fallback: None,
                fallback_after: 10_000,
            },
            mtu: 1500,
            hostname: None,
            rx_budget: 256,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

/// An inbound transport packet for the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub src_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub payload: Vec<u8>,
}

/// One interface poll's worth of upward traffic.
#[derive(Debug, Default)]
pub struct IfPoll {
    pub deliveries: Vec<Delivery>,
    /// Addresses whose ARP probes timed out this tick.
    pub arp_failures: Vec<Ipv4Addr>,
}

/// Where a destination resolves at the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Mac(MacAddr),
    /// An ARP probe is outstanding; retry next tick or park a frame.
    Pending,
    Unreachable,
}

pub struct Interface {
    driver: Box<dyn LinkDriver>,
    pub mac: MacAddr,
    state: LinkState,
    ip: Ipv4Addr,
    mask: Ipv4Addr,
    gateway: Ipv4Addr,
    mtu: usize,
    dhcp: Option<DhcpClient>,
    fallback: Option<StaticAddr>,
    fallback_after: Millis,
    up_since: Millis,
    static_addr: Option<StaticAddr>,
    pub arp: ArpCache,
    counters: Counters,
    next_housekeep: Millis,
    rx_budget: usize,
}

impl Interface {
    pub fn new(driver: Box<dyn LinkDriver>, config: InterfaceConfig) -> Self {
        let mut rng = rand::thread_rng();
        let mac = config.mac.unwrap_or_else(|| {
            let mut bytes: [u8; 6] = rng.gen();
            bytes[0] = (bytes[0] | 0x02) & !0x01; // locally administered, unicast
            MacAddr(bytes)
        });
        let (dhcp, fallback, fallback_after, static_addr) = match config.ip {
            IpConfig::Static(addr) => (None, None, 0, Some(addr)),
            IpConfig::Dhcp {
                fallback,
                fallback_after,
            } => (
                Some(DhcpClient::new(mac, config.hostname.clone(), rng.gen())),
                fallback,
                fallback_after,
                None,
            ),
        };
        Self {
            driver,
            mac,
            state: LinkState::Down,
            ip: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            mtu: config.mtu,
            dhcp,
            fallback,
            fallback_after,
            up_since: 0,
            static_addr,
            arp: ArpCache::new(),
            counters: Counters::default(),
            next_housekeep: 0,
            rx_budget: config.rx_budget,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Payload bytes a TCP segment can carry under this MTU, floored at
    /// the 536-byte protocol minimum.
    pub fn tcp_mss(&self) -> u16 {
        self.mtu
            .saturating_sub(Ipv4Packet::HEADER_LEN + 20)
            .clamp(536, u16::MAX as usize) as u16
    }

    /// Whether `ip` shares this interface's subnet.
    pub fn is_on_subnet(&self, ip: Ipv4Addr) -> bool {
        self.is_local(ip)
    }

    /// Next housekeeping instant, for embedder sleep calculations.
    pub fn next_deadline(&self) -> Millis {
        self.next_housekeep
    }

    fn is_local(&self, ip: Ipv4Addr) -> bool {
        let m = u32::from(self.mask);
        u32::from(ip) & m == u32::from(self.ip) & m
    }

    fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) | !u32::from(self.mask))
    }

    /// Resolve a destination IP to a next-hop MAC, probing as needed.
    pub fn resolve(&mut self, ip: Ipv4Addr, now: Millis) -> Resolution {
        if self.ip.is_unspecified() {
            return Resolution::Unreachable;
        }
        if ip == Ipv4Addr::BROADCAST || (self.is_local(ip) && ip == self.subnet_broadcast()) {
            return Resolution::Mac(MacAddr::BROADCAST);
        }
        if ip.is_multicast() {
            return Resolution::Mac(MacAddr::for_ipv4_multicast(ip));
        }
        let next_hop = if self.is_local(ip) {
            ip
        } else if !self.gateway.is_unspecified() {
            self.gateway
        } else {
            return Resolution::Unreachable;
        };
        match self.arp.lookup(next_hop, now) {
            Some(mac) => Resolution::Mac(mac),
            None => {
                if self.arp.probe(next_hop, now) {
                    self.send_arp_request(next_hop);
                }
                Resolution::Pending
            }
        }
    }

    /// Park an already-built frame until its next hop resolves.
    pub fn park_for(&mut self, dst_ip: Ipv4Addr, frame: Vec<u8>) {
        let next_hop = if self.is_local(dst_ip) { dst_ip } else { self.gateway };
        self.arp.park(next_hop, frame);
    }

    pub fn transmit_frame(&mut self, frame: &[u8]) {
        if self.driver.transmit(frame) {
            self.counters.tx_frames += 1;
        } else {
            self.counters.tx_dropped += 1;
            trace!("driver tx queue full, frame dropped");
        }
    }

    /// Build an Ethernet+IPv4 frame around a transport payload.
    pub fn build_ipv4_frame(
        &self,
        dst_mac: MacAddr,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        protocol: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let ip = Ipv4Packet::serialize(src_ip, dst_ip, protocol, DEFAULT_TTL, payload);
        EthernetFrame::serialize(dst_mac, self.mac, EtherType::IPV4, &ip)
    }

    pub fn send_ipv4(&mut self, dst_mac: MacAddr, dst_ip: Ipv4Addr, protocol: u8, payload: &[u8]) {
        let frame = self.build_ipv4_frame(dst_mac, self.ip, dst_ip, protocol, payload);
        self.transmit_frame(&frame);
    }

    fn send_arp_request(&mut self, target: Ipv4Addr) {
        debug!(target = %target, "arp request");
        let arp = ArpPacket::request(self.mac, self.ip, target).serialize();
        let frame = EthernetFrame::serialize(MacAddr::BROADCAST, self.mac, EtherType::ARP, &arp);
        self.transmit_frame(&frame);
    }

    fn send_dhcp(&mut self, output: DhcpOutput, now: Millis) {
        let (dst_mac, src_ip, dst_ip, payload) = match output {
            DhcpOutput::Broadcast(p) => (
                MacAddr::BROADCAST,
                Ipv4Addr::UNSPECIFIED,
                Ipv4Addr::BROADCAST,
                p,
            ),
            DhcpOutput::Unicast { server, payload } => {
                let mac = self
                    .arp
                    .lookup(server, now)
                    .unwrap_or(MacAddr::BROADCAST);
                (mac, self.ip, server, payload)
            }
        };
        let udp = UdpDatagramBuilder {
            src: src_ip,
            dst: dst_ip,
            src_port: DHCP_CLIENT_PORT,
            dst_port: DHCP_SERVER_PORT,
            payload: &payload,
        }
        .build_vec();
        let frame = self.build_ipv4_frame(dst_mac, src_ip, dst_ip, Ipv4Protocol::UDP, &udp);
        self.transmit_frame(&frame);
    }

    fn adopt_addr(&mut self, ip: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr, now: Millis) {
        self.ip = ip;
        self.mask = mask;
        self.gateway = gateway;
        info!(ip = %ip, mask = %mask, gw = %gateway, "interface address configured");
        self.state = LinkState::HaveIp;
        if gateway.is_unspecified() {
            self.state = LinkState::Ready;
        } else if self.arp.lookup(gateway, now).is_some() {
            self.state = LinkState::Ready;
        } else if self.arp.probe(gateway, now) {
            self.send_arp_request(gateway);
        }
    }

    fn drop_addr(&mut self) {
        warn!(ip = %self.ip, "interface address lost");
        self.ip = Ipv4Addr::UNSPECIFIED;
        self.mask = Ipv4Addr::UNSPECIFIED;
        self.gateway = Ipv4Addr::UNSPECIFIED;
        self.state = if self.driver.link_up() {
            LinkState::Up
        } else {
            LinkState::Down
        };
    }

    fn housekeep(&mut self, now: Millis, poll: &mut IfPoll) {
        poll.arp_failures = self.arp.sweep(now);

        let link = self.driver.link_up();
        match (self.state, link) {
            (LinkState::Down, true) => {
                info!("link up");
                self.up_since = now;
                self.state = LinkState::Up;
            }
            (LinkState::Down, false) => return,
            (_, false) => {
                warn!("link down");
                self.drop_addr();
                self.state = LinkState::Down;
                return;
            }
            _ => {}
        }

        if self.state == LinkState::Up {
            match (self.static_addr, self.dhcp.is_some()) {
                (Some(addr), _) => self.adopt_addr(addr.ip, addr.mask, addr.gateway, now),
                (None, true) => self.state = LinkState::Requesting,
                (None, false) => {}
            }
        }

        if let Some(dhcp) = self.dhcp.as_mut() {
            let (outputs, events) = dhcp.on_tick(now);
            for output in outputs {
                self.send_dhcp(output, now);
            }
            for event in events {
                match event {
                    DhcpEvent::Bound(lease) => self.apply_lease(lease, now),
                    DhcpEvent::Lost => self.drop_addr(),
                }
            }
            // static fallback when the server never answers
            if self.state == LinkState::Requesting
                && now >= self.up_since + self.fallback_after
            {
                if let Some(addr) = self.fallback {
                    warn!("no dhcp lease, using fallback address");
                    self.adopt_addr(addr.ip, addr.mask, addr.gateway, now);
                }
            }
        }

        // gateway resolution completes the bring-up
        if self.state == LinkState::HaveIp {
            if let Some(mac) = self.arp.lookup(self.gateway, now) {
                debug!(gw = %self.gateway, mac = ?mac, "gateway resolved");
                self.state = LinkState::Ready;
            } else if self.arp.probe(self.gateway, now) {
                self.send_arp_request(self.gateway);
            }
        }
    }

    fn apply_lease(&mut self, lease: Lease, now: Millis) {
        self.adopt_addr(lease.ip, lease.mask, lease.gateway, now);
    }

    /// Drain the driver and run housekeeping. ARP, ICMP echo and DHCP are
    /// answered inline; transport packets come back in the result.
    pub fn poll(&mut self, now: Millis) -> IfPoll {
        let mut result = IfPoll::default();
        if now >= self.next_housekeep {
            self.housekeep(now, &mut result);
            self.next_housekeep = now + HOUSEKEEP_INTERVAL;
        }
        for _ in 0..self.rx_budget {
            let Some(frame) = self.driver.poll_receive() else {
                break;
            };
            self.counters.rx_frames += 1;
            self.recv_frame(&frame, now, &mut result);
        }
        result
    }

    fn recv_frame(&mut self, frame: &[u8], now: Millis, poll: &mut IfPoll) {
        let eth = match EthernetFrame::parse(frame) {
            Ok(eth) => eth,
            Err(_) => {
                self.counters.rx_dropped += 1;
                return;
            }
        };
        if eth.dst != self.mac && !eth.dst.is_broadcast() && !eth.dst.is_multicast() {
            self.counters.rx_dropped += 1;
            return;
        }
        match eth.ethertype {
            EtherType::ARP => self.recv_arp(eth.payload, now),
            EtherType::IPV4 => self.recv_ipv4(&eth, now, poll),
            _ => self.counters.rx_dropped += 1,
        }
    }

    fn recv_arp(&mut self, payload: &[u8], now: Millis) {
        let arp = match ArpPacket::parse(payload) {
            Ok(arp) => arp,
            Err(_) => {
                self.counters.rx_dropped += 1;
                return;
            }
        };
        if !arp.sender_ip.is_unspecified() {
            if let Some(mut parked) = self.arp.learn(arp.sender_ip, arp.sender_hw, now) {
                trace!(ip = %arp.sender_ip, "sending frame parked on arp");
                // parked frames carry a placeholder destination
                parked[..6].copy_from_slice(&arp.sender_hw.0);
                self.transmit_frame(&parked);
            }
        }
        if arp.op == ArpOperation::Request && !self.ip.is_unspecified() && arp.target_ip == self.ip
        {
            let reply = ArpPacket::reply_to(&arp, self.mac, self.ip).serialize();
            let frame =
                EthernetFrame::serialize(arp.sender_hw, self.mac, EtherType::ARP, &reply);
            self.transmit_frame(&frame);
        }
    }

    fn recv_ipv4(&mut self, eth: &EthernetFrame<'_>, now: Millis, poll: &mut IfPoll) {
        let pkt = match Ipv4Packet::parse(eth.payload) {
            Ok(pkt) => pkt,
            Err(_) => {
                self.counters.rx_dropped += 1;
                return;
            }
        };
        if pkt.is_fragment {
            // reassembly unsupported; peers see silence and fall back
            self.counters.rx_dropped += 1;
            return;
        }
        let for_us = pkt.dst == self.ip
            || pkt.dst == Ipv4Addr::BROADCAST
            || (!self.ip.is_unspecified() && pkt.dst == self.subnet_broadcast())
            // DHCP replies may be addressed to the still-unconfigured ip
            || (self.ip.is_unspecified() && pkt.protocol == Ipv4Protocol::UDP);
        if !for_us {
            self.counters.rx_dropped += 1;
            return;
        }
        match pkt.protocol {
            Ipv4Protocol::ICMP => self.recv_icmp(eth.src, &pkt),
            Ipv4Protocol::UDP if self.recv_dhcp(&pkt, now) => {}
            Ipv4Protocol::UDP | Ipv4Protocol::TCP => poll.deliveries.push(Delivery {
                src_mac: eth.src,
                src_ip: pkt.src,
                dst_ip: pkt.dst,
                protocol: pkt.protocol,
                payload: pkt.payload.to_vec(),
            }),
            _ => self.counters.rx_dropped += 1,
        }
    }

    fn recv_icmp(&mut self, src_mac: MacAddr, pkt: &Ipv4Packet<'_>) {
        let Ok(echo) = IcmpEcho::parse(pkt.payload) else {
            self.counters.rx_dropped += 1;
            return;
        };
        if echo.is_request {
            trace!(src = %pkt.src, "icmp echo");
            let reply = echo.reply().serialize();
            let frame =
                self.build_ipv4_frame(src_mac, self.ip, pkt.src, Ipv4Protocol::ICMP, &reply);
            self.transmit_frame(&frame);
        }
    }

    /// Returns true when the datagram was DHCP and consumed here.
    fn recv_dhcp(&mut self, pkt: &Ipv4Packet<'_>, now: Millis) -> bool {
        let Some(dhcp) = self.dhcp.as_mut() else {
            return false;
        };
        let Ok(udp) = UdpDatagram::parse(pkt.payload) else {
            return false;
        };
        if udp.dst_port() != DHCP_CLIENT_PORT || udp.src_port() != DHCP_SERVER_PORT {
            return false;
        }
        let Ok(msg) = DhcpMessage::parse(udp.payload()) else {
            self.counters.rx_dropped += 1;
            return true;
        };
        let (outputs, events) = dhcp.on_message(&msg, now);
        for output in outputs {
            self.send_dhcp(output, now);
        }
        for event in events {
            match event {
                DhcpEvent::Bound(lease) => self.apply_lease(lease, now),
                DhcpEvent::Lost => self.drop_addr(),
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanonet_driver::QueueDriver;
    use std::cell::RefCell;
    use std::rc::Rc;

    const OUR_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 0xaa]);
    const OUR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 9);
    const GW_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const GW_MAC: MacAddr = MacAddr([9; 6]);

    type Wire = Rc<RefCell<QueueDriver>>;

    fn static_iface() -> (Interface, Wire) {
        let wire = Rc::new(RefCell::new(QueueDriver::new()));
        let iface = Interface::new(
            Box::new(Rc::clone(&wire)),
            InterfaceConfig {
                mac: Some(OUR_MAC),
                ip: IpConfig::Static(StaticAddr {
                    ip: OUR_IP,
                    mask: Ipv4Addr::new(255, 255, 255, 0),
                    gateway: GW_IP,
                }),
                ..InterfaceConfig::default()
            },
        );
        (iface, wire)
    }

    fn gw_arp_reply() -> Vec<u8> {
        let arp = ArpPacket {
            op: ArpOperation::Reply,
            sender_hw: GW_MAC,
            sender_ip: GW_IP,
            target_hw: OUR_MAC,
            target_ip: OUR_IP,
        }
        .serialize();
        EthernetFrame::serialize(OUR_MAC, GW_MAC, EtherType::ARP, &arp)
    }

    #[test]
    fn static_bringup_resolves_gateway() {
        let (mut iface, wire) = static_iface();
        iface.poll(0);
        assert_eq!(iface.state(), LinkState::HaveIp);
        // bring-up issued exactly one gateway probe
        let tx = wire.borrow_mut().drain_tx_frames();
        assert_eq!(tx.len(), 1);
        let eth = EthernetFrame::parse(&tx[0]).unwrap();
        assert_eq!(eth.ethertype, EtherType::ARP);
        let arp = ArpPacket::parse(eth.payload).unwrap();
        assert_eq!(arp.op, ArpOperation::Request);
        assert_eq!(arp.target_ip, GW_IP);

        wire.borrow_mut().push_rx_frame(gw_arp_reply());
        iface.poll(10);
        // resolution observed at next housekeeping
        iface.poll(1_000);
        assert_eq!(iface.state(), LinkState::Ready);
        assert_eq!(iface.resolve(Ipv4Addr::new(8, 8, 8, 8), 1_001), Resolution::Mac(GW_MAC));
    }

    #[test]
    fn answers_arp_for_our_address() {
        let (mut iface, wire) = static_iface();
        iface.poll(0);
        wire.borrow_mut().drain_tx_frames();

        let peer_mac = MacAddr([5; 6]);
        let req = ArpPacket::request(peer_mac, Ipv4Addr::new(192, 168, 1, 30), OUR_IP).serialize();
        let frame = EthernetFrame::serialize(MacAddr::BROADCAST, peer_mac, EtherType::ARP, &req);
        wire.borrow_mut().push_rx_frame(frame);
        iface.poll(5);

        let tx = wire.borrow_mut().drain_tx_frames();
        assert_eq!(tx.len(), 1);
        let eth = EthernetFrame::parse(&tx[0]).unwrap();
        assert_eq!(eth.dst, peer_mac);
        let arp = ArpPacket::parse(eth.payload).unwrap();
        assert_eq!(arp.op, ArpOperation::Reply);
        assert_eq!(arp.sender_ip, OUR_IP);
        assert_eq!(arp.sender_hw, OUR_MAC);
        // the requester was learned opportunistically
        assert_eq!(
            iface.arp.lookup(Ipv4Addr::new(192, 168, 1, 30), 6),
            Some(peer_mac)
        );
    }

    #[test]
    fn echoes_icmp_ping() {
        let (mut iface, wire) = static_iface();
        iface.poll(0);
        wire.borrow_mut().drain_tx_frames();

        let echo = IcmpEcho {
            is_request: true,
            id: 3,
            seq: 1,
            payload: b"abcdefgh",
        }
        .serialize();
        let peer_ip = Ipv4Addr::new(192, 168, 1, 40);
        let ip = Ipv4Packet::serialize(peer_ip, OUR_IP, Ipv4Protocol::ICMP, 64, &echo);
        let frame = EthernetFrame::serialize(OUR_MAC, MacAddr([5; 6]), EtherType::IPV4, &ip);
        wire.borrow_mut().push_rx_frame(frame);
        iface.poll(5);

        let tx = wire.borrow_mut().drain_tx_frames();
        assert_eq!(tx.len(), 1);
        let eth = EthernetFrame::parse(&tx[0]).unwrap();
        let pkt = Ipv4Packet::parse(eth.payload).unwrap();
        assert_eq!(pkt.dst, peer_ip);
        let reply = IcmpEcho::parse(pkt.payload).unwrap();
        assert!(!reply.is_request);
        assert_eq!(reply.id, 3);
        assert_eq!(reply.payload, b"abcdefgh");
    }

    #[test]
    fn fragments_are_dropped() {
        let (mut iface, wire) = static_iface();
        iface.poll(0);
        wire.borrow_mut().drain_tx_frames();

        let mut ip = Ipv4Packet::serialize(GW_IP, OUR_IP, Ipv4Protocol::UDP, 64, b"part");
        ip[6] = 0x20; // MF
        ip[10] = 0;
        ip[11] = 0;
        let csum = nanonet_packet::checksum::ipv4_header_checksum(&ip[..20]);
        ip[10..12].copy_from_slice(&csum.to_be_bytes());
        let frame = EthernetFrame::serialize(OUR_MAC, GW_MAC, EtherType::IPV4, &ip);
        wire.borrow_mut().push_rx_frame(frame);
        let poll = iface.poll(5);
        assert!(poll.deliveries.is_empty());
        assert_eq!(iface.counters().rx_dropped, 1);
    }

    #[test]
    fn transport_packets_delivered_upward() {
        let (mut iface, wire) = static_iface();
        iface.poll(0);
        wire.borrow_mut().drain_tx_frames();

        let udp = UdpDatagramBuilder {
            src: GW_IP,
            dst: OUR_IP,
            src_port: 5000,
            dst_port: 6000,
            payload: b"hi",
        }
        .build_vec();
        let ip = Ipv4Packet::serialize(GW_IP, OUR_IP, Ipv4Protocol::UDP, 64, &udp);
        let frame = EthernetFrame::serialize(OUR_MAC, GW_MAC, EtherType::IPV4, &ip);
        wire.borrow_mut().push_rx_frame(frame);
        let poll = iface.poll(5);
        assert_eq!(poll.deliveries.len(), 1);
        let d = &poll.deliveries[0];
        assert_eq!(d.src_ip, GW_IP);
        assert_eq!(d.protocol, Ipv4Protocol::UDP);
        assert_eq!(d.src_mac, GW_MAC);
    }

    #[test]
    fn frames_for_other_macs_ignored() {
        let (mut iface, wire) = static_iface();
        iface.poll(0);
        wire.borrow_mut().drain_tx_frames();

        let ip = Ipv4Packet::serialize(GW_IP, OUR_IP, Ipv4Protocol::UDP, 64, b"x");
        let frame = EthernetFrame::serialize(MacAddr([8; 6]), GW_MAC, EtherType::IPV4, &ip);
        wire.borrow_mut().push_rx_frame(frame);
        let poll = iface.poll(5);
        assert!(poll.deliveries.is_empty());
        assert_eq!(iface.counters().rx_dropped, 1);
    }

    #[test]
    fn dhcp_bringup_to_ready() {
        let wire = Rc::new(RefCell::new(QueueDriver::new()));
        let mut iface = Interface::new(
            Box::new(Rc::clone(&wire)),
            InterfaceConfig {
                mac: Some(OUR_MAC),
                hostname: Some("unit".into()),
                ..InterfaceConfig::default()
            },
        );
        iface.poll(0);
        assert_eq!(iface.state(), LinkState::Requesting);
        let tx = wire.borrow_mut().drain_tx_frames();
        assert_eq!(tx.len(), 1, "discover broadcast");
        let eth = EthernetFrame::parse(&tx[0]).unwrap();
        assert!(eth.dst.is_broadcast());
        let pkt = Ipv4Packet::parse(eth.payload).unwrap();
        assert_eq!(pkt.src, Ipv4Addr::UNSPECIFIED);
        let udp = UdpDatagram::parse(pkt.payload).unwrap();
        assert_eq!(udp.dst_port(), DHCP_SERVER_PORT);
        let discover = DhcpMessage::parse(udp.payload()).unwrap();
        let xid = discover.xid;

        // offer -> the client requests immediately
        wire.borrow_mut().push_rx_frame(server_reply(xid, 2, 3600));
        iface.poll(10);
        let tx = wire.borrow_mut().drain_tx_frames();
        assert_eq!(tx.len(), 1, "request broadcast");

        // ack -> address adopted, gateway probe sent
        wire.borrow_mut().push_rx_frame(server_reply(xid, 5, 3600));
        iface.poll(20);
        assert_eq!(iface.state(), LinkState::HaveIp);
        assert_eq!(iface.ip(), Ipv4Addr::new(192, 168, 1, 77));
        assert_eq!(iface.gateway(), GW_IP);
        let tx = wire.borrow_mut().drain_tx_frames();
        assert_eq!(tx.len(), 1);
        let arp = ArpPacket::parse(EthernetFrame::parse(&tx[0]).unwrap().payload).unwrap();
        assert_eq!(arp.target_ip, GW_IP);

        wire.borrow_mut().push_rx_frame(gw_arp_reply_to(Ipv4Addr::new(192, 168, 1, 77)));
        iface.poll(30);
        iface.poll(1_000);
        assert_eq!(iface.state(), LinkState::Ready);
    }

    fn gw_arp_reply_to(target: Ipv4Addr) -> Vec<u8> {
        let arp = ArpPacket {
            op: ArpOperation::Reply,
            sender_hw: GW_MAC,
            sender_ip: GW_IP,
            target_hw: OUR_MAC,
            target_ip: target,
        }
        .serialize();
        EthernetFrame::serialize(OUR_MAC, GW_MAC, EtherType::ARP, &arp)
    }

    fn server_reply(xid: u32, message_type: u8, lease_secs: u32) -> Vec<u8> {
        let mut body = vec![0u8; 240];
        body[0] = 2;
        body[4..8].copy_from_slice(&xid.to_be_bytes());
        body[16..20].copy_from_slice(&[192, 168, 1, 77]);
        body[28..34].copy_from_slice(&OUR_MAC.0);
        body[236..240].copy_from_slice(&0x6382_5363u32.to_be_bytes());
        body.extend_from_slice(&[53, 1, message_type]);
        body.extend_from_slice(&[1, 4, 255, 255, 255, 0]);
        body.extend_from_slice(&[3, 4, 192, 168, 1, 1]);
        body.extend_from_slice(&[54, 4, 192, 168, 1, 1]);
        let secs = lease_secs.to_be_bytes();
        body.extend_from_slice(&[51, 4, secs[0], secs[1], secs[2], secs[3]]);
        body.push(255);
        let udp = UdpDatagramBuilder {
            src: GW_IP,
            dst: Ipv4Addr::BROADCAST,
            src_port: DHCP_SERVER_PORT,
            dst_port: DHCP_CLIENT_PORT,
            payload: &body,
        }
        .build_vec();
        let ip = Ipv4Packet::serialize(GW_IP, Ipv4Addr::BROADCAST, Ipv4Protocol::UDP, 64, &udp);
        EthernetFrame::serialize(MacAddr::BROADCAST, GW_MAC, EtherType::IPV4, &ip)
    }

    #[test]
    fn dhcp_falls_back_to_static() {
        let wire = Rc::new(RefCell::new(QueueDriver::new()));
        let mut iface = Interface::new(
            Box::new(Rc::clone(&wire)),
            InterfaceConfig {
                mac: Some(OUR_MAC),
                ip: IpConfig::Dhcp {
                    fallback: Some(StaticAddr {
                        ip: OUR_IP,
                        mask: Ipv4Addr::new(255, 255, 255, 0),
                        gateway: Ipv4Addr::UNSPECIFIED,
                    }),
                    fallback_after: 3_000,
                },
                ..InterfaceConfig::default()
            },
        );
        // no server answers the discovers
        iface.poll(0);
        iface.poll(1_000);
        iface.poll(2_000);
        assert_eq!(iface.state(), LinkState::Requesting);
        iface.poll(3_000);
        assert_eq!(iface.state(), LinkState::Ready);
        assert_eq!(iface.ip(), OUR_IP);
    }

    #[test]
    fn mss_tracks_mtu() {
        let (iface, _wire) = static_iface();
        assert_eq!(iface.tcp_mss(), 1460);
    }

    #[test]
    fn mss_floors_tiny_mtu() {
        let iface = Interface::new(
            Box::new(QueueDriver::new()),
            InterfaceConfig {
                mac: Some(OUR_MAC),
                mtu: 30,
                ..InterfaceConfig::default()
            },
        );
        assert_eq!(iface.tcp_mss(), 536);
    }

    #[test]
    fn resolution_classes() {
        let (mut iface, _wire) = static_iface();
        iface.poll(0);
        assert_eq!(
            iface.resolve(Ipv4Addr::BROADCAST, 10),
            Resolution::Mac(MacAddr::BROADCAST)
        );
        assert_eq!(
            iface.resolve(Ipv4Addr::new(192, 168, 1, 255), 10),
            Resolution::Mac(MacAddr::BROADCAST)
        );
        assert_eq!(
            iface.resolve(Ipv4Addr::new(239, 1, 2, 3), 10),
            Resolution::Mac(MacAddr([0x01, 0x00, 0x5e, 0x01, 0x02, 0x03]))
        );
        // off-subnet goes via the gateway, whose probe is already out
        assert_eq!(iface.resolve(Ipv4Addr::new(8, 8, 8, 8), 10), Resolution::Pending);
        // local unknown host starts its own probe
        assert_eq!(
            iface.resolve(Ipv4Addr::new(192, 168, 1, 50), 10),
            Resolution::Pending
        );
        assert!(iface.arp.is_probing(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[test]
    fn unaddressed_interface_unreachable() {
        let mut iface = Interface::new(
            Box::new(QueueDriver::new()),
            InterfaceConfig {
                mac: Some(OUR_MAC),
                ..InterfaceConfig::default()
            },
        );
        assert_eq!(
            iface.resolve(Ipv4Addr::new(192, 168, 1, 1), 0),
            Resolution::Unreachable
        );
    }
}
