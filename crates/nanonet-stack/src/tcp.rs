//! TCP engine: an explicit state machine plus a pure socket that consumes
//! parsed segments and produces segment descriptors. No I/O happens here;
//! the manager owns framing, checksums and the driver.

use crate::error::Error;
use crate::Millis;
use nanonet_packet::TcpFlags;
use std::collections::VecDeque;
use tracing::{debug, trace};

pub const RTO_INIT: Millis = 1_000;
pub const RTO_MAX: Millis = 16_000;
pub const MAX_RETRIES: u8 = 5;
pub const SYN_TIMEOUT: Millis = 15_000;
pub const TIME_WAIT_MS: Millis = 5_000;
pub const ACK_DELAY: Millis = 150;
pub const KEEPALIVE_INTERVAL: Millis = 45_000;
pub const KEEPALIVE_MAX_MISSES: u8 = 3;
pub const WINDOW_PROBE_INTERVAL: Millis = 6_000;
pub const OOO_MAX_SEGMENTS: usize = 4;

fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

fn seq_le(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    /// States in which user data can still be queued for sending.
    pub fn may_send(self) -> bool {
        matches!(self, Self::Established | Self::CloseWait)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpInput {
    PassiveOpen,
    ActiveOpen,
    RecvSyn,
    RecvSynAck,
    RecvAckOfSyn,
    RecvFin,
    RecvAckOfFin,
    RecvRst,
    CloseRequest,
    TimeWaitExpired,
}

/// The transition table. `None` means the input is illegal in that state
/// and the segment (or request) is ignored.
pub fn transition(state: TcpState, input: TcpInput) -> Option<TcpState> {
    use TcpInput::*;
    use TcpState::*;
    Some(match (state, input) {
        (Closed, PassiveOpen) => Listen,
        (Closed, ActiveOpen) => SynSent,
        (Listen, RecvSyn) => SynReceived,
        (Listen, CloseRequest) => Closed,
        (SynSent, RecvSynAck) => Established,
        (SynSent, RecvSyn) => SynReceived, // simultaneous open
        (SynSent, CloseRequest) => Closed,
        (SynReceived, RecvAckOfSyn) => Established,
        (SynReceived, CloseRequest) => FinWait1,
        (Established, RecvFin) => CloseWait,
        (Established, CloseRequest) => FinWait1,
        (FinWait1, RecvAckOfFin) => FinWait2,
        (FinWait1, RecvFin) => Closing,
        (FinWait2, RecvFin) => TimeWait,
        (CloseWait, CloseRequest) => LastAck,
        (Closing, RecvAckOfFin) => TimeWait,
        (LastAck, RecvAckOfFin) => Closed,
        (TimeWait, RecvFin) => TimeWait, // peer retransmitted its FIN
        (TimeWait, TimeWaitExpired) => Closed,
        (
            SynSent | SynReceived | Established | FinWait1 | FinWait2 | CloseWait | Closing
            | LastAck | TimeWait,
            RecvRst,
        ) => Closed,
        _ => return None,
    })
}

/// A parsed inbound segment, options pre-digested by the caller.
#[derive(Debug, Clone, Copy)]
pub struct SegIn<'a> {
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub mss: Option<u16>,
    pub wscale: Option<u8>,
    pub payload: &'a [u8],
}

/// An outbound segment descriptor. The manager adds addressing, checksums
/// and framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegOut {
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub mss: Option<u16>,
    pub payload: Vec<u8>,
}

/// What a batch of input did to the socket, for the manager to translate
/// into connection events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockEvent {
    /// Handshake completed.
    Connected,
    /// In-order payload ready for the receive buffer.
    Data(Vec<u8>),
    /// Previously sent data bytes were acknowledged.
    Acked(usize),
    /// Peer sent FIN; no more data will arrive.
    PeerClosed,
    /// Peer reset the connection.
    Reset,
    /// The socket reached `Closed` through an orderly teardown.
    Closed,
    /// Timer-driven failure.
    Failed(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegKind {
    Syn,
    Data,
    Fin,
}

#[derive(Debug)]
struct TxSegment {
    seq: u32,
    kind: SegKind,
    payload: Vec<u8>,
}

impl TxSegment {
    fn seq_len(&self) -> u32 {
        match self.kind {
            SegKind::Syn | SegKind::Fin => 1,
            SegKind::Data => self.payload.len() as u32,
        }
    }
}

pub struct TcpSocket {
    state: TcpState,
    /// Initial send sequence number.
    iss: u32,
    snd_una: u32,
    snd_nxt: u32,
    /// Peer receive window, already scaled.
    snd_wnd: u32,
    peer_wscale: u8,
    rcv_nxt: u32,
    /// Effective segment size for outgoing data.
    mss: u16,
    local_mss: u16,

    rtq: VecDeque<TxSegment>,
    rto: Millis,
    rto_deadline: Option<Millis>,
    retries: u8,
    syn_deadline: Option<Millis>,

    ooo: Vec<(u32, Vec<u8>)>,
    ack_deadline: Option<Millis>,
    /// Receive bytes not yet covered by an ACK we sent.
    unacked_rx: u32,

    time_wait_deadline: Option<Millis>,
    probe_deadline: Option<Millis>,
    last_activity: Millis,
    keepalive_misses: u8,
}

impl TcpSocket {
    fn base(iss: u32, local_mss: u16, now: Millis) -> Self {
        Self {
            state: TcpState::Closed,
            iss,
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0,
            peer_wscale: 0,
            rcv_nxt: 0,
            mss: local_mss,
            local_mss,
            rtq: VecDeque::new(),
            rto: RTO_INIT,
            rto_deadline: None,
            retries: 0,
            syn_deadline: None,
            ooo: Vec::new(),
            ack_deadline: None,
            unacked_rx: 0,
            time_wait_deadline: None,
            probe_deadline: None,
            last_activity: now,
            keepalive_misses: 0,
        }
    }

    /// Active open. Returns the SYN to put on the wire.
    pub fn connect(iss: u32, local_mss: u16, now: Millis, recv_window: u16) -> (Self, SegOut) {
        let mut sock = Self::base(iss, local_mss, now);
        sock.state = TcpState::SynSent;
        sock.syn_deadline = Some(now + SYN_TIMEOUT);
        let syn = sock.push_tx(SegKind::Syn, Vec::new(), now, recv_window);
        (sock, syn)
    }

    /// Passive open from a received SYN. Returns the SYN-ACK.
    pub fn accept(
        syn: &SegIn<'_>,
        iss: u32,
        local_mss: u16,
        now: Millis,
        recv_window: u16,
    ) -> (Self, SegOut) {
        let mut sock = Self::base(iss, local_mss, now);
        sock.state = TcpState::SynReceived;
        sock.rcv_nxt = syn.seq.wrapping_add(1);
        sock.absorb_syn_options(syn);
        let syn_ack = sock.push_tx(SegKind::Syn, Vec::new(), now, recv_window);
        (sock, syn_ack)
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == TcpState::Closed
    }

    /// Peer window space not yet occupied by in-flight data.
    pub fn send_window_available(&self) -> u32 {
        let in_flight = self.snd_nxt.wrapping_sub(self.snd_una);
        self.snd_wnd.saturating_sub(in_flight)
    }

    fn absorb_syn_options(&mut self, seg: &SegIn<'_>) {
        if let Some(peer_mss) = seg.mss {
            self.mss = self.local_mss.min(peer_mss).max(536);
        }
        if let Some(ws) = seg.wscale {
            self.peer_wscale = ws.min(14);
        }
        // a window carried on a SYN is never scaled
        self.snd_wnd = seg.window as u32;
    }

    fn push_tx(&mut self, kind: SegKind, payload: Vec<u8>, now: Millis, recv_window: u16) -> SegOut {
        let seq = self.snd_nxt;
        let seg = TxSegment { seq, kind, payload };
        self.snd_nxt = self.snd_nxt.wrapping_add(seg.seq_len());
        let out = self.describe(&seg, recv_window);
        self.rtq.push_back(seg);
        if self.rto_deadline.is_none() {
            self.rto_deadline = Some(now + self.rto);
        }
        out
    }

    /// Wire form of a queued segment. Retransmits are byte-identical
    /// because this is the only place that shapes them.
    fn describe(&self, seg: &TxSegment, recv_window: u16) -> SegOut {
        match seg.kind {
            SegKind::Syn => {
                let flags = if self.state == TcpState::SynReceived {
                    TcpFlags::SYN | TcpFlags::ACK
                } else {
                    TcpFlags::SYN
                };
                SegOut {
                    seq: seg.seq,
                    ack: self.rcv_nxt,
                    flags,
                    window: recv_window,
                    mss: Some(self.local_mss),
                    payload: Vec::new(),
                }
            }
            SegKind::Data => SegOut {
                seq: seg.seq,
                ack: self.rcv_nxt,
                flags: TcpFlags::PSH | TcpFlags::ACK,
                window: recv_window,
                mss: None,
                payload: seg.payload.clone(),
            },
            SegKind::Fin => SegOut {
                seq: seg.seq,
                ack: self.rcv_nxt,
                flags: TcpFlags::FIN | TcpFlags::ACK,
                window: recv_window,
                mss: None,
                payload: Vec::new(),
            },
        }
    }

    fn pure_ack(&mut self, recv_window: u16) -> SegOut {
        self.ack_deadline = None;
        self.unacked_rx = 0;
        SegOut {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: TcpFlags::ACK,
            window: recv_window,
            mss: None,
            payload: Vec::new(),
        }
    }

    fn enter(&mut self, input: TcpInput) -> bool {
        match transition(self.state, input) {
            Some(next) => {
                trace!(from = ?self.state, to = ?next, ?input, "tcp transition");
                self.state = next;
                true
            }
            None => {
                debug!(state = ?self.state, ?input, "ignored illegal tcp input");
                false
            }
        }
    }

    /// Move as much of `data` as the peer window and MSS allow into the
    /// retransmission queue. Returns the bytes taken and the segments to
    /// transmit now.
    pub fn transmit(
        &mut self,
        data: &[u8],
        now: Millis,
        recv_window: u16,
    ) -> (usize, Vec<SegOut>) {
        if !self.state.may_send() {
            return (0, Vec::new());
        }
        let mut taken = 0;
        let mut out = Vec::new();
        while taken < data.len() {
            let room = self.send_window_available() as usize;
            if room == 0 {
                if self.probe_deadline.is_none() && self.snd_wnd == 0 {
                    self.probe_deadline = Some(now + WINDOW_PROBE_INTERVAL);
                }
                break;
            }
            let chunk = (data.len() - taken).min(self.mss as usize).min(room);
            let payload = data[taken..taken + chunk].to_vec();
            out.push(self.push_tx(SegKind::Data, payload, now, recv_window));
            taken += chunk;
        }
        if !out.is_empty() {
            // data segments carry the ACK, no separate delayed ack needed
            self.ack_deadline = None;
            self.unacked_rx = 0;
        }
        (taken, out)
    }

    /// Orderly close from our side.
    pub fn close(&mut self, now: Millis, recv_window: u16) -> Vec<SegOut> {
        match self.state {
            TcpState::SynSent | TcpState::Listen => {
                self.enter(TcpInput::CloseRequest);
                self.rtq.clear();
                self.rto_deadline = None;
                Vec::new()
            }
            TcpState::SynReceived | TcpState::Established | TcpState::CloseWait => {
                self.enter(TcpInput::CloseRequest);
                vec![self.push_tx(SegKind::Fin, Vec::new(), now, recv_window)]
            }
            // already closing, request is a no-op
            _ => Vec::new(),
        }
    }

    /// Hard abort. Returns the RST to transmit; the socket is Closed.
    pub fn abort(&mut self, recv_window: u16) -> SegOut {
        let rst = SegOut {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: TcpFlags::RST | TcpFlags::ACK,
            window: recv_window,
            mss: None,
            payload: Vec::new(),
        };
        self.state = TcpState::Closed;
        self.rtq.clear();
        self.rto_deadline = None;
        rst
    }

    /// Feed one inbound segment.
    pub fn on_segment(
        &mut self,
        seg: &SegIn<'_>,
        now: Millis,
        recv_window: u16,
    ) -> (Vec<SegOut>, Vec<SockEvent>) {
        let mut out = Vec::new();
        let mut events = Vec::new();
        self.last_activity = now;
        self.keepalive_misses = 0;

        if seg.flags.contains(TcpFlags::RST) {
            if self.enter(TcpInput::RecvRst) {
                self.rtq.clear();
                self.rto_deadline = None;
                events.push(SockEvent::Reset);
            }
            return (out, events);
        }

        match self.state {
            TcpState::SynSent => {
                if seg.flags.contains(TcpFlags::SYN | TcpFlags::ACK)
                    && seg.ack == self.iss.wrapping_add(1)
                {
                    self.rcv_nxt = seg.seq.wrapping_add(1);
                    self.absorb_syn_options(seg);
                    self.snd_una = seg.ack;
                    self.rtq.clear();
                    self.rto_deadline = None;
                    self.rto = RTO_INIT;
                    self.retries = 0;
                    self.syn_deadline = None;
                    self.enter(TcpInput::RecvSynAck);
                    out.push(self.pure_ack(recv_window));
                    events.push(SockEvent::Connected);
                }
                return (out, events);
            }
            TcpState::SynReceived => {
                if seg.flags.contains(TcpFlags::ACK) && seg.ack == self.iss.wrapping_add(1) {
                    self.snd_una = seg.ack;
                    self.rtq.retain(|s| s.kind != SegKind::Syn);
                    self.rto_deadline = None;
                    self.rto = RTO_INIT;
                    self.retries = 0;
                    self.enter(TcpInput::RecvAckOfSyn);
                    events.push(SockEvent::Connected);
                    // fall through: the ACK may carry data
                } else {
                    return (out, events);
                }
            }
            TcpState::Closed | TcpState::Listen => return (out, events),
            _ => {}
        }

        if seg.flags.contains(TcpFlags::ACK) {
            self.process_ack(seg, now, &mut events);
        }
        self.process_payload(seg, now, recv_window, &mut out, &mut events);
        self.process_fin(seg, recv_window, &mut out, &mut events);
        (out, events)
    }

    fn process_ack(&mut self, seg: &SegIn<'_>, now: Millis, events: &mut Vec<SockEvent>) {
        // window update applies even on duplicate ACKs
        let scaled = (seg.window as u32) << self.peer_wscale;
        if scaled > 0 {
            self.probe_deadline = None;
        }
        self.snd_wnd = scaled;

        if !(seq_lt(self.snd_una, seg.ack) && seq_le(seg.ack, self.snd_nxt)) {
            return;
        }
        let mut acked_data = 0usize;
        let mut fin_acked = false;
        while let Some(front) = self.rtq.front() {
            let end = front.seq.wrapping_add(front.seq_len());
            if !seq_le(end, seg.ack) {
                break;
            }
            let Some(seg_done) = self.rtq.pop_front() else {
                break;
            };
            match seg_done.kind {
                SegKind::Data => acked_data += seg_done.payload.len(),
                SegKind::Fin => fin_acked = true,
                SegKind::Syn => {}
            }
        }
        self.snd_una = seg.ack;
        self.retries = 0;
        self.rto = RTO_INIT;
        self.rto_deadline = if self.rtq.is_empty() {
            None
        } else {
            Some(now + self.rto)
        };
        if acked_data > 0 {
            events.push(SockEvent::Acked(acked_data));
        }
        if fin_acked {
            match self.state {
                TcpState::FinWait1 => {
                    self.enter(TcpInput::RecvAckOfFin);
                }
                TcpState::Closing => {
                    self.enter(TcpInput::RecvAckOfFin);
                    self.time_wait_deadline = Some(now + TIME_WAIT_MS);
                }
                TcpState::LastAck => {
                    self.enter(TcpInput::RecvAckOfFin);
                    events.push(SockEvent::Closed);
                }
                _ => {}
            }
        }
    }

    fn process_payload(
        &mut self,
        seg: &SegIn<'_>,
        now: Millis,
        recv_window: u16,
        out: &mut Vec<SegOut>,
        events: &mut Vec<SockEvent>,
    ) {
        if seg.payload.is_empty() {
            return;
        }
        if !matches!(
            self.state,
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
        ) {
            return;
        }
        let mut seq = seg.seq;
        let mut payload = seg.payload;
        // trim a stale prefix from an overlapping retransmit
        if seq_lt(seq, self.rcv_nxt) {
            let stale = self.rcv_nxt.wrapping_sub(seq) as usize;
            if stale >= payload.len() {
                // pure duplicate, re-ack so the peer stops retransmitting
                out.push(self.pure_ack(recv_window));
                return;
            }
            payload = &payload[stale..];
            seq = self.rcv_nxt;
        }
        if seq != self.rcv_nxt {
            // future segment: park it, bounded, drop-newest
            if self.ooo.len() < OOO_MAX_SEGMENTS
                && !self.ooo.iter().any(|(s, _)| *s == seq)
            {
                self.ooo.push((seq, payload.to_vec()));
            }
            // duplicate ACK tells the peer what we still expect
            out.push(self.pure_ack(recv_window));
            return;
        }

        let mut data = payload.to_vec();
        self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
        // chain parked segments the stream has reached; a covering
        // retransmit may have overtaken them partially or entirely
        loop {
            self.ooo
                .retain(|(s, chunk)| seq_lt(self.rcv_nxt, s.wrapping_add(chunk.len() as u32)));
            let next = self
                .ooo
                .iter()
                .position(|(s, _)| seq_le(*s, self.rcv_nxt));
            match next {
                Some(i) => {
                    let (s, chunk) = self.ooo.swap_remove(i);
                    let skip = self.rcv_nxt.wrapping_sub(s) as usize;
                    self.rcv_nxt = self.rcv_nxt.wrapping_add((chunk.len() - skip) as u32);
                    data.extend_from_slice(&chunk[skip..]);
                }
                None => break,
            }
        }
        self.unacked_rx += data.len() as u32;
        events.push(SockEvent::Data(data));

        if self.unacked_rx >= (recv_window as u32) / 2 {
            out.push(self.pure_ack(recv_window));
        } else if self.ack_deadline.is_none() {
            self.ack_deadline = Some(now + ACK_DELAY);
        }
    }

    fn process_fin(
        &mut self,
        seg: &SegIn<'_>,
        recv_window: u16,
        out: &mut Vec<SegOut>,
        events: &mut Vec<SockEvent>,
    ) {
        if !seg.flags.contains(TcpFlags::FIN) {
            return;
        }
        let fin_seq = seg.seq.wrapping_add(seg.payload.len() as u32);
        if fin_seq != self.rcv_nxt {
            // FIN beyond a gap; wait for the missing data first
            return;
        }
        if !self.enter(TcpInput::RecvFin) {
            return;
        }
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        out.push(self.pure_ack(recv_window));
        if self.state == TcpState::TimeWait {
            self.time_wait_deadline = Some(self.last_activity + TIME_WAIT_MS);
        }
        if matches!(self.state, TcpState::CloseWait | TcpState::Closing | TcpState::TimeWait) {
            events.push(SockEvent::PeerClosed);
        }
    }

    /// Timer pass. Produces retransmissions, delayed ACKs, window probes,
    /// keepalives and expiry events.
    pub fn on_tick(&mut self, now: Millis, recv_window: u16) -> (Vec<SegOut>, Vec<SockEvent>) {
        let mut out = Vec::new();
        let mut events = Vec::new();

        if let Some(deadline) = self.time_wait_deadline {
            if now >= deadline && self.state == TcpState::TimeWait {
                self.enter(TcpInput::TimeWaitExpired);
                self.time_wait_deadline = None;
                events.push(SockEvent::Closed);
                return (out, events);
            }
        }

        if let Some(deadline) = self.syn_deadline {
            if now >= deadline && self.state == TcpState::SynSent {
                self.state = TcpState::Closed;
                self.rtq.clear();
                self.rto_deadline = None;
                events.push(SockEvent::Failed(Error::ConnectTimeout));
                return (out, events);
            }
        }

        if let Some(deadline) = self.rto_deadline {
            if now >= deadline {
                if self.retries >= MAX_RETRIES {
                    self.state = TcpState::Closed;
                    self.rtq.clear();
                    self.rto_deadline = None;
                    events.push(SockEvent::Failed(Error::RetransmitTimeout));
                    return (out, events);
                }
                if let Some(front) = self.rtq.front() {
                    let resend = self.describe(front, recv_window);
                    debug!(seq = resend.seq, rto = self.rto, "tcp retransmit");
                    out.push(resend);
                }
                self.retries += 1;
                self.rto = (self.rto * 2).min(RTO_MAX);
                self.rto_deadline = Some(now + self.rto);
            }
        }

        if let Some(deadline) = self.ack_deadline {
            if now >= deadline {
                out.push(self.pure_ack(recv_window));
            }
        }

        if let Some(deadline) = self.probe_deadline {
            if now >= deadline && self.snd_wnd == 0 {
                out.push(self.pure_ack(recv_window));
                self.probe_deadline = Some(now + WINDOW_PROBE_INTERVAL);
            }
        }

        if self.state == TcpState::Established
            && now >= self.last_activity + KEEPALIVE_INTERVAL
        {
            if self.keepalive_misses >= KEEPALIVE_MAX_MISSES {
                self.state = TcpState::Closed;
                self.rtq.clear();
                events.push(SockEvent::Failed(Error::KeepaliveTimeout));
                return (out, events);
            }
            // probe with seq one below the left edge; the peer must ACK
            out.push(SegOut {
                seq: self.snd_una.wrapping_sub(1),
                ack: self.rcv_nxt,
                flags: TcpFlags::ACK,
                window: recv_window,
                mss: None,
                payload: Vec::new(),
            });
            self.keepalive_misses += 1;
            self.last_activity = now;
        }

        (out, events)
    }

    /// Earliest timer this socket is waiting on.
    pub fn next_deadline(&self) -> Option<Millis> {
        let keepalive = if self.state == TcpState::Established {
            Some(self.last_activity + KEEPALIVE_INTERVAL)
        } else {
            None
        };
        [
            self.rto_deadline,
            self.ack_deadline,
            self.syn_deadline,
            self.time_wait_deadline,
            self.probe_deadline,
            keepalive,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}
