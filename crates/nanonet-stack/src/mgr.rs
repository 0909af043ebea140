//! Connection manager: the single-threaded, non-blocking poll loop.
//!
//! One tick runs housekeeping and frame intake, connection timers, a flush
//! of queued application data, then event dispatch and deferred teardown.
//! Handlers run only from the dispatch phase, so no connection disappears
//! under a running callback.

use crate::buffer::IoBuf;
use crate::conn::{ConnId, Connection, Proto, Transport};
use crate::error::Error;
use crate::event::{Event, EventHandler};
use crate::interface::{Delivery, Interface, InterfaceConfig, Resolution};
use crate::tcp::{SegIn, SegOut, SockEvent, TcpSocket, TcpState};
use crate::Millis;
use core::net::{Ipv4Addr, SocketAddrV4};
use nanonet_driver::LinkDriver;
use nanonet_packet::{
    Ipv4Protocol, MacAddr, TcpFlags, TcpSegment, TcpSegmentBuilder, UdpDatagram,
    UdpDatagramBuilder,
};
use rand::Rng;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

const EPHEMERAL_BASE: u16 = 32768;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub interface: InterfaceConfig,
    /// Per-connection receive buffer limit; also caps the advertised window.
    pub recv_limit: usize,
    /// Per-connection send queue limit.
    pub send_limit: usize,
    pub max_connections: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: InterfaceConfig::default(),
            recv_limit: 1 << 20,
            send_limit: 1 << 20,
            max_connections: 128,
        }
    }
}

pub struct Manager {
    iface: Interface,
    conns: Vec<Connection>,
    pending: VecDeque<(ConnId, Event)>,
    next_id: u64,
    eport: u16,
    now: Millis,
    recv_limit: usize,
    send_limit: usize,
    max_connections: usize,
}

impl Manager {
    pub fn new(driver: Box<dyn LinkDriver>, config: EngineConfig) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            iface: Interface::new(driver, config.interface),
            conns: Vec::new(),
            pending: VecDeque::new(),
            next_id: 1,
            eport: EPHEMERAL_BASE + rng.gen_range(0..16_384),
            now: 0,
            recv_limit: config.recv_limit,
            send_limit: config.send_limit,
            max_connections: config.max_connections,
        }
    }

    pub fn interface(&self) -> &Interface {
        &self.iface
    }

    pub fn is_ready(&self) -> bool {
        self.iface.is_ready()
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    pub fn connection(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.iter_mut().find(|c| c.id == id)
    }

    /// Queue data on a connection from outside a handler.
    pub fn send(&mut self, id: ConnId, data: &[u8]) -> Result<(), Error> {
        self.connection(id)
            .ok_or(Error::NotWritable)?
            .send(data)
    }

    /// Request an orderly close from outside a handler.
    pub fn close(&mut self, id: ConnId) {
        if let Some(conn) = self.connection(id) {
            conn.close();
        }
    }

    fn alloc_id(&mut self) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        id
    }

    fn port_taken(&self, proto: Proto, port: u16) -> bool {
        self.conns
            .iter()
            .any(|c| c.transport.proto() == proto && c.local.port() == port)
    }

    fn alloc_eport(&mut self, proto: Proto) -> u16 {
        loop {
            let port = self.eport;
            self.eport = if self.eport == u16::MAX {
                EPHEMERAL_BASE
            } else {
                self.eport + 1
            };
            if !self.port_taken(proto, port) {
                return port;
            }
        }
    }

    fn new_conn(
        &mut self,
        local: SocketAddrV4,
        peer: SocketAddrV4,
        transport: Transport,
        handler: Option<EventHandler>,
        handler_owner: Option<ConnId>,
    ) -> ConnId {
        let id = self.alloc_id();
        self.conns.push(Connection {
            id,
            local,
            peer,
            transport,
            recv: IoBuf::new(self.recv_limit),
            send: IoBuf::new(self.send_limit),
            handler,
            handler_owner,
            is_client: false,
            is_accepted: false,
            close_requested: false,
            fin_sent: false,
            is_closing: false,
            user_data: None,
        });
        self.pending.push_back((id, Event::Open));
        id
    }

    /// Open a listener. Accepted connections report events through this
    /// listener's handler.
    pub fn listen(
        &mut self,
        proto: Proto,
        port: u16,
        handler: EventHandler,
    ) -> Result<ConnId, Error> {
        if self.port_taken(proto, port) {
            return Err(Error::PortInUse);
        }
        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let peer = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        let id = self.new_conn(local, peer, Transport::Listener(proto), Some(handler), None);
        debug!(%id, ?proto, port, "listening");
        Ok(id)
    }

    /// Open an outbound connection. Fails fast when the interface has no
    /// usable address yet.
    pub fn connect(
        &mut self,
        proto: Proto,
        peer: SocketAddrV4,
        handler: EventHandler,
    ) -> Result<ConnId, Error> {
        if self.iface.ip().is_unspecified() {
            return Err(Error::NetworkDown);
        }
        if self.conns.len() >= self.max_connections {
            return Err(Error::TableFull);
        }
        let local = SocketAddrV4::new(self.iface.ip(), self.alloc_eport(proto));
        let now = self.now;
        let id = match proto {
            Proto::Tcp => {
                let isn = rand::thread_rng().gen();
                let win = self.recv_limit.min(0xffff) as u16;
                let (sock, syn) = TcpSocket::connect(isn, self.iface.tcp_mss(), now, win);
                let id = self.new_conn(local, peer, Transport::Tcp(sock), Some(handler), None);
                self.send_tcp_segment(local, peer, &syn, now);
                id
            }
            Proto::Udp => {
                let id = self.new_conn(
                    local,
                    peer,
                    Transport::Udp { tx: VecDeque::new() },
                    Some(handler),
                    None,
                );
                // no handshake; usable as soon as it exists
                self.pending.push_back((id, Event::Connect));
                id
            }
        };
        debug!(%id, ?proto, peer = %peer, "connecting");
        if let Some(conn) = self.connection(id) {
            conn.is_client = true;
        }
        Ok(id)
    }

    /// Run one engine tick at the given clock reading.
    pub fn poll(&mut self, now: Millis) {
        self.now = now;
        let if_poll = self.iface.poll(now);
        for delivery in if_poll.deliveries {
            match delivery.protocol {
                Ipv4Protocol::TCP => self.rx_tcp(&delivery, now),
                Ipv4Protocol::UDP => self.rx_udp(&delivery),
                _ => {}
            }
        }
        for failed in if_poll.arp_failures {
            self.fail_unresolved(failed);
        }
        self.run_timers(now);
        self.flush(now);
        self.dispatch();
        // handlers may have queued data or requested close this tick
        self.flush(now);
        self.conns.retain(|c| !c.is_closing);
    }

    /// Earliest instant at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Millis> {
        let sockets = self.conns.iter().filter_map(|c| match &c.transport {
            Transport::Tcp(sock) => sock.next_deadline(),
            _ => None,
        });
        sockets.chain(Some(self.iface.next_deadline())).min()
    }

    fn recv_window(&self, idx: usize) -> u16 {
        self.conns[idx].recv.remaining().min(0xffff) as u16
    }

    fn queue_error_close(&mut self, id: ConnId, err: Error) {
        self.pending.push_back((id, Event::Error(err)));
        self.pending.push_back((id, Event::Close));
    }

    fn fail_unresolved(&mut self, failed: Ipv4Addr) {
        let gateway = self.iface.gateway();
        let mut doomed = Vec::new();
        for conn in &self.conns {
            let connecting = match &conn.transport {
                Transport::Tcp(sock) => sock.state() == TcpState::SynSent,
                _ => false,
            };
            if !connecting {
                continue;
            }
            let peer_ip = *conn.peer.ip();
            let next_hop = if self.iface.is_on_subnet(peer_ip) {
                peer_ip
            } else {
                gateway
            };
            if next_hop == failed {
                doomed.push(conn.id);
            }
        }
        for id in doomed {
            warn!(%id, ip = %failed, "arp timed out");
            self.queue_error_close(id, Error::ArpTimeout);
        }
    }

    fn send_transport(&mut self, dst_ip: Ipv4Addr, proto: u8, payload: &[u8], now: Millis) {
        match self.iface.resolve(dst_ip, now) {
            Resolution::Mac(mac) => self.iface.send_ipv4(mac, dst_ip, proto, payload),
            Resolution::Pending => {
                // destination MAC is patched in when the probe resolves
                let frame = self.iface.build_ipv4_frame(
                    MacAddr::ZERO,
                    self.iface.ip(),
                    dst_ip,
                    proto,
                    payload,
                );
                self.iface.park_for(dst_ip, frame);
            }
            Resolution::Unreachable => trace!(ip = %dst_ip, "unreachable, frame dropped"),
        }
    }

    fn send_tcp_segment(
        &mut self,
        local: SocketAddrV4,
        peer: SocketAddrV4,
        seg: &SegOut,
        now: Millis,
    ) {
        let bytes = TcpSegmentBuilder {
            src: self.iface.ip(),
            dst: *peer.ip(),
            src_port: local.port(),
            dst_port: peer.port(),
            seq: seg.seq,
            ack: seg.ack,
            flags: seg.flags,
            window: seg.window,
            mss: seg.mss,
            payload: &seg.payload,
        }
        .build_vec();
        self.send_transport(*peer.ip(), Ipv4Protocol::TCP, &bytes, now);
    }

    fn send_orphan_rst(&mut self, delivery: &Delivery, seg: &TcpSegment<'_>, now: Millis) {
        let mut advance = seg.payload().len() as u32;
        if seg.flags().contains(TcpFlags::SYN) || seg.flags().contains(TcpFlags::FIN) {
            advance += 1;
        }
        let (seq, ack) = if seg.flags().contains(TcpFlags::ACK) {
            (seg.ack(), seg.seq().wrapping_add(advance))
        } else {
            (0, seg.seq().wrapping_add(advance))
        };
        let rst = SegOut {
            seq,
            ack,
            flags: TcpFlags::RST | TcpFlags::ACK,
            window: 0,
            mss: None,
            payload: Vec::new(),
        };
        let local = SocketAddrV4::new(delivery.dst_ip, seg.dst_port());
        let peer = SocketAddrV4::new(delivery.src_ip, seg.src_port());
        self.send_tcp_segment(local, peer, &rst, now);
    }

    fn rx_tcp(&mut self, delivery: &Delivery, now: Millis) {
        let seg = match TcpSegment::parse(&delivery.payload) {
            Ok(seg) => seg,
            Err(_) => return,
        };
        if !seg.checksum_valid_ipv4(delivery.src_ip, delivery.dst_ip) {
            debug!(src = %delivery.src_ip, "tcp checksum mismatch");
            return;
        }
        let seg_in = SegIn {
            seq: seg.seq(),
            ack: seg.ack(),
            flags: seg.flags(),
            window: seg.window(),
            mss: seg.mss_option(),
            wscale: seg.window_scale_option(),
            payload: seg.payload(),
        };
        let peer = SocketAddrV4::new(delivery.src_ip, seg.src_port());

        let existing = self.conns.iter().position(|c| {
            !c.is_closing
                && matches!(c.transport, Transport::Tcp(_))
                && c.local.port() == seg.dst_port()
                && c.peer == peer
        });
        if let Some(idx) = existing {
            let win = self.recv_window(idx);
            let (local, peer) = (self.conns[idx].local, self.conns[idx].peer);
            let (outs, events) = match &mut self.conns[idx].transport {
                Transport::Tcp(sock) => sock.on_segment(&seg_in, now, win),
                _ => unreachable!(),
            };
            for out in &outs {
                self.send_tcp_segment(local, peer, out, now);
            }
            self.apply_sock_events(idx, events, now);
            return;
        }

        let listener = self.conns.iter().position(|c| {
            matches!(c.transport, Transport::Listener(Proto::Tcp))
                && c.local.port() == seg.dst_port()
                && !c.is_closing
        });
        match listener {
            Some(l_idx)
                if seg_in.flags.contains(TcpFlags::SYN)
                    && !seg_in.flags.contains(TcpFlags::ACK) =>
            {
                if self.conns.len() >= self.max_connections {
                    warn!(port = seg.dst_port(), "connection table full, resetting");
                    self.send_orphan_rst(delivery, &seg, now);
                    return;
                }
                let listener_id = self.conns[l_idx].id;
                let isn = rand::thread_rng().gen();
                let win = self.recv_limit.min(0xffff) as u16;
                let (sock, syn_ack) =
                    TcpSocket::accept(&seg_in, isn, self.iface.tcp_mss(), now, win);
                let local = SocketAddrV4::new(delivery.dst_ip, seg.dst_port());
                let id = self.new_conn(local, peer, Transport::Tcp(sock), None, Some(listener_id));
                if let Some(conn) = self.connection(id) {
                    conn.is_accepted = true;
                }
                debug!(%id, peer = %peer, "accepted");
                self.pending.push_back((id, Event::Accept));
                self.send_tcp_segment(local, peer, &syn_ack, now);
            }
            _ if !seg_in.flags.contains(TcpFlags::RST) => {
                self.send_orphan_rst(delivery, &seg, now);
            }
            _ => {}
        }
    }

    fn rx_udp(&mut self, delivery: &Delivery) {
        let Ok(udp) = UdpDatagram::parse(&delivery.payload) else {
            return;
        };
        if !udp.checksum_valid_ipv4(delivery.src_ip, delivery.dst_ip) {
            debug!(src = %delivery.src_ip, "udp checksum mismatch");
            return;
        }
        let peer = SocketAddrV4::new(delivery.src_ip, udp.src_port());
        let existing = self.conns.iter().position(|c| {
            !c.is_closing
                && matches!(c.transport, Transport::Udp { .. })
                && c.local.port() == udp.dst_port()
                && c.peer == peer
        });
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let listener = self.conns.iter().position(|c| {
                    matches!(c.transport, Transport::Listener(Proto::Udp))
                        && c.local.port() == udp.dst_port()
                        && !c.is_closing
                });
                let Some(l_idx) = listener else {
                    trace!(port = udp.dst_port(), "udp datagram for closed port");
                    return;
                };
                if self.conns.len() >= self.max_connections {
                    warn!(port = udp.dst_port(), "connection table full, datagram dropped");
                    return;
                }
                let listener_id = self.conns[l_idx].id;
                let local = SocketAddrV4::new(delivery.dst_ip, udp.dst_port());
                let id = self.new_conn(
                    local,
                    peer,
                    Transport::Udp { tx: VecDeque::new() },
                    None,
                    Some(listener_id),
                );
                if let Some(conn) = self.connection(id) {
                    conn.is_accepted = true;
                }
                self.pending.push_back((id, Event::Accept));
                self.conns.len() - 1
            }
        };
        let payload = udp.payload();
        let id = self.conns[idx].id;
        match self.conns[idx].recv.append(payload) {
            Ok(()) => self.pending.push_back((id, Event::Read(payload.len()))),
            Err(err) => self.queue_error_close(id, err),
        }
    }

    fn apply_sock_events(&mut self, idx: usize, events: Vec<SockEvent>, now: Millis) {
        let id = self.conns[idx].id;
        for event in events {
            match event {
                SockEvent::Connected => {
                    if self.conns[idx].is_client {
                        self.pending.push_back((id, Event::Connect));
                    }
                }
                SockEvent::Data(bytes) => {
                    let appended = self.conns[idx].recv.append(&bytes);
                    match appended {
                        Ok(()) => self.pending.push_back((id, Event::Read(bytes.len()))),
                        Err(err) => {
                            // hard stop: the peer outran our buffer policy
                            let win = self.recv_window(idx);
                            let (local, peer) = (self.conns[idx].local, self.conns[idx].peer);
                            let rst = match &mut self.conns[idx].transport {
                                Transport::Tcp(sock) => sock.abort(win),
                                _ => unreachable!(),
                            };
                            self.send_tcp_segment(local, peer, &rst, now);
                            self.queue_error_close(id, err);
                        }
                    }
                }
                SockEvent::Acked(n) => self.pending.push_back((id, Event::Write(n))),
                SockEvent::PeerClosed => {
                    // drain our queue, then answer with our own FIN
                    self.conns[idx].close_requested = true;
                }
                SockEvent::Reset => self.queue_error_close(id, Error::PeerReset),
                SockEvent::Closed => self.pending.push_back((id, Event::Close)),
                SockEvent::Failed(err) => self.queue_error_close(id, err),
            }
        }
    }

    fn run_timers(&mut self, now: Millis) {
        for idx in 0..self.conns.len() {
            if self.conns[idx].is_closing {
                continue;
            }
            let win = self.recv_window(idx);
            let (local, peer) = (self.conns[idx].local, self.conns[idx].peer);
            let result = match &mut self.conns[idx].transport {
                Transport::Tcp(sock) => Some(sock.on_tick(now, win)),
                _ => None,
            };
            if let Some((outs, events)) = result {
                for out in &outs {
                    self.send_tcp_segment(local, peer, out, now);
                }
                self.apply_sock_events(idx, events, now);
            }
        }
    }

    fn flush(&mut self, now: Millis) {
        for idx in 0..self.conns.len() {
            if self.conns[idx].is_closing {
                continue;
            }
            let win = self.recv_window(idx);
            let (local, peer) = (self.conns[idx].local, self.conns[idx].peer);
            let id = self.conns[idx].id;

            let mut tcp_outs: Vec<SegOut> = Vec::new();
            let mut udp_outs: Vec<Vec<u8>> = Vec::new();
            let mut queue_close = false;
            {
                let conn = &mut self.conns[idx];
                match &mut conn.transport {
                    Transport::Tcp(sock) => {
                        if sock.state().may_send() && !conn.send.is_empty() {
                            let (taken, outs) = sock.transmit(conn.send.as_slice(), now, win);
                            conn.send.consume(taken);
                            tcp_outs = outs;
                        }
                        if conn.close_requested && !conn.fin_sent && conn.send.is_empty() {
                            tcp_outs.extend(sock.close(now, win));
                            conn.fin_sent = true;
                            // closing an unestablished socket ends it now
                            if sock.is_closed() {
                                queue_close = true;
                            }
                        }
                    }
                    Transport::Udp { tx } => {
                        while let Some(dgram) = tx.pop_front() {
                            conn.send.consume(dgram.len());
                            udp_outs.push(dgram);
                        }
                        if conn.close_requested && !conn.fin_sent {
                            conn.fin_sent = true;
                            queue_close = true;
                        }
                    }
                    Transport::Listener(_) => {
                        if conn.close_requested && !conn.fin_sent {
                            conn.fin_sent = true;
                            queue_close = true;
                        }
                    }
                }
            }
            for out in &tcp_outs {
                self.send_tcp_segment(local, peer, out, now);
            }
            for dgram in udp_outs {
                let bytes = UdpDatagramBuilder {
                    src: self.iface.ip(),
                    dst: *peer.ip(),
                    src_port: local.port(),
                    dst_port: peer.port(),
                    payload: &dgram,
                }
                .build_vec();
                self.send_transport(*peer.ip(), Ipv4Protocol::UDP, &bytes, now);
            }
            if queue_close {
                self.pending.push_back((id, Event::Close));
            }
        }
    }

    fn dispatch(&mut self) {
        while let Some((id, event)) = self.pending.pop_front() {
            let Some(idx) = self.conns.iter().position(|c| c.id == id) else {
                continue;
            };
            let owner_idx = self.conns[idx]
                .handler_owner
                .and_then(|owner| self.conns.iter().position(|c| c.id == owner))
                .unwrap_or(idx);
            let mut handler = self.conns[owner_idx].handler.take();
            if let Some(h) = handler.as_mut() {
                h(&mut self.conns[idx], &event);
            }
            self.conns[owner_idx].handler = handler;
            if event == Event::Close {
                self.conns[idx].is_closing = true;
            }
        }
    }
}
