//! DHCP client: DISCOVER/OFFER/REQUEST/ACK with 1 Hz retries while
//! acquiring, renewal at the lease midpoint, and a fresh DISCOVER after
//! expiry or NAK. The client builds UDP payloads only; the interface owns
//! addressing and framing.

use crate::Millis;
use core::net::Ipv4Addr;
use nanonet_packet::{DhcpMessage, DhcpMessageType, MacAddr};
use tracing::{debug, info};

const RETRY_INTERVAL: Millis = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Option<Ipv4Addr>,
    pub server: Ipv4Addr,
    pub renew_at: Millis,
    pub expires_at: Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Discovering,
    Requesting,
    Bound,
    Renewing,
}

/// A payload for the interface to wrap in UDP 68 -> 67.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOutput {
    /// To 255.255.255.255 at the broadcast MAC.
    Broadcast(Vec<u8>),
    /// Renewal, straight to the leasing server.
    Unicast { server: Ipv4Addr, payload: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpEvent {
    /// A lease was acquired or renewed.
    Bound(Lease),
    /// The lease is gone; the interface must drop its address.
    Lost,
}

pub struct DhcpClient {
    mac: MacAddr,
    xid: u32,
    hostname: Option<String>,
    phase: Phase,
    offer: Option<(Ipv4Addr, Ipv4Addr)>,
    lease: Option<Lease>,
    next_attempt: Millis,
}

impl DhcpClient {
    pub fn new(mac: MacAddr, hostname: Option<String>, xid_seed: u32) -> Self {
        // xid carries MAC entropy so concurrent clients on one segment
        // do not collide
        let xid = u32::from_be_bytes([mac.0[2], mac.0[3], mac.0[4], mac.0[5]]) ^ xid_seed;
        Self {
            mac,
            xid,
            hostname,
            phase: Phase::Discovering,
            offer: None,
            lease: None,
            next_attempt: 0,
        }
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.phase, Phase::Bound | Phase::Renewing)
    }

    fn restart(&mut self, now: Millis) {
        self.phase = Phase::Discovering;
        self.offer = None;
        self.lease = None;
        self.next_attempt = now;
    }

    /// Timer pass, called from interface housekeeping.
    pub fn on_tick(&mut self, now: Millis) -> (Vec<DhcpOutput>, Vec<DhcpEvent>) {
        let mut out = Vec::new();
        let mut events = Vec::new();

        if let Some(lease) = self.lease {
            if now >= lease.expires_at {
                info!(ip = %lease.ip, "dhcp lease expired");
                self.restart(now);
                events.push(DhcpEvent::Lost);
            } else if now >= lease.renew_at && self.phase == Phase::Bound {
                debug!(ip = %lease.ip, "dhcp renewing");
                self.phase = Phase::Renewing;
                self.next_attempt = now;
            }
        }

        if now >= self.next_attempt {
            match self.phase {
                Phase::Discovering => {
                    out.push(DhcpOutput::Broadcast(DhcpMessage::serialize_discover(
                        self.xid, self.mac,
                    )));
                    self.next_attempt = now + RETRY_INTERVAL;
                }
                Phase::Requesting => {
                    if let Some((ip, server)) = self.offer {
                        out.push(DhcpOutput::Broadcast(DhcpMessage::serialize_request(
                            self.xid,
                            self.mac,
                            ip,
                            server,
                            self.hostname.as_deref(),
                        )));
                    }
                    self.next_attempt = now + RETRY_INTERVAL;
                }
                Phase::Renewing => {
                    if let Some(lease) = self.lease {
                        out.push(DhcpOutput::Unicast {
                            server: lease.server,
                            payload: DhcpMessage::serialize_renew(self.xid, self.mac, lease.ip),
                        });
                    }
                    self.next_attempt = now + RETRY_INTERVAL;
                }
                Phase::Bound => {}
            }
        }
        (out, events)
    }

    /// Feed a server message received on the client port.
    pub fn on_message(
        &mut self,
        msg: &DhcpMessage,
        now: Millis,
    ) -> (Vec<DhcpOutput>, Vec<DhcpEvent>) {
        let mut out = Vec::new();
        let mut events = Vec::new();
        if !msg.is_reply || msg.xid != self.xid || msg.chaddr != self.mac {
            return (out, events);
        }
        match msg.options.message_type {
            Some(DhcpMessageType::Offer) if self.phase == Phase::Discovering => {
                let server = match msg.options.server_id {
                    Some(s) => s,
                    None => msg.siaddr,
                };
                debug!(ip = %msg.yiaddr, server = %server, "dhcp offer");
                self.offer = Some((msg.yiaddr, server));
                self.phase = Phase::Requesting;
                out.push(DhcpOutput::Broadcast(DhcpMessage::serialize_request(
                    self.xid,
                    self.mac,
                    msg.yiaddr,
                    server,
                    self.hostname.as_deref(),
                )));
                self.next_attempt = now + RETRY_INTERVAL;
            }
            Some(DhcpMessageType::Ack)
                if matches!(self.phase, Phase::Requesting | Phase::Renewing) =>
            {
                let lease_secs = msg.options.lease_secs.unwrap_or(3600) as Millis;
                let lease = Lease {
                    ip: msg.yiaddr,
                    mask: msg
                        .options
                        .subnet_mask
                        .unwrap_or(Ipv4Addr::new(255, 255, 255, 0)),
                    gateway: msg.options.router.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    dns: msg.options.dns,
                    server: msg.options.server_id.unwrap_or(msg.siaddr),
                    renew_at: now + lease_secs * 1_000 / 2,
                    expires_at: now + lease_secs * 1_000,
                };
                info!(ip = %lease.ip, gw = %lease.gateway, lease_secs, "dhcp bound");
                self.lease = Some(lease);
                self.phase = Phase::Bound;
                self.offer = None;
                events.push(DhcpEvent::Bound(lease));
            }
            Some(DhcpMessageType::Nak) => {
                debug!("dhcp nak, restarting");
                let had_lease = self.lease.is_some();
                self.restart(now);
                if had_lease {
                    events.push(DhcpEvent::Lost);
                }
            }
            _ => {}
        }
        (out, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanonet_packet::DhcpOptions;

    const MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);
    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const LEASED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 77);

    fn reply(client: &DhcpClient, mt: DhcpMessageType, lease_secs: Option<u32>) -> DhcpMessage {
        DhcpMessage {
            is_reply: true,
            xid: client.xid,
            yiaddr: LEASED,
            siaddr: SERVER,
            chaddr: MAC,
            options: DhcpOptions {
                message_type: Some(mt),
                subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
                router: Some(SERVER),
                lease_secs,
                server_id: Some(SERVER),
                dns: None,
            },
        }
    }

    fn bind(client: &mut DhcpClient, now: Millis) -> Lease {
        let (out, _) = client.on_tick(now);
        assert!(matches!(out[0], DhcpOutput::Broadcast(_)));
        let (out, _) = client.on_message(&reply(client, DhcpMessageType::Offer, None), now + 1);
        assert_eq!(out.len(), 1, "offer answered with a request");
        let (_, events) =
            client.on_message(&reply(client, DhcpMessageType::Ack, Some(60)), now + 2);
        match events[0] {
            DhcpEvent::Bound(lease) => lease,
            DhcpEvent::Lost => panic!("expected bind"),
        }
    }

    #[test]
    fn full_acquisition() {
        let mut client = DhcpClient::new(MAC, Some("host".into()), 7);
        let lease = bind(&mut client, 0);
        assert_eq!(lease.ip, LEASED);
        assert_eq!(lease.gateway, SERVER);
        assert_eq!(lease.expires_at, 2 + 60_000);
        assert_eq!(lease.renew_at, 2 + 30_000);
        assert!(client.is_bound());
    }

    #[test]
    fn discover_retries_at_one_hz() {
        let mut client = DhcpClient::new(MAC, None, 7);
        assert_eq!(client.on_tick(0).0.len(), 1);
        assert_eq!(client.on_tick(500).0.len(), 0);
        assert_eq!(client.on_tick(1_000).0.len(), 1);
    }

    #[test]
    fn wrong_xid_ignored() {
        let mut client = DhcpClient::new(MAC, None, 7);
        client.on_tick(0);
        let mut msg = reply(&client, DhcpMessageType::Offer, None);
        msg.xid ^= 1;
        let (out, events) = client.on_message(&msg, 1);
        assert!(out.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn renews_at_midpoint() {
        let mut client = DhcpClient::new(MAC, None, 7);
        let lease = bind(&mut client, 0);
        assert!(client.on_tick(lease.renew_at - 1).0.is_empty());
        let (out, _) = client.on_tick(lease.renew_at);
        assert!(matches!(out[0], DhcpOutput::Unicast { server, .. } if server == SERVER));
        // renewal ack extends the lease
        let (_, events) =
            client.on_message(&reply(&client, DhcpMessageType::Ack, Some(60)), lease.renew_at + 1);
        assert!(matches!(events[0], DhcpEvent::Bound(l) if l.expires_at > lease.expires_at));
    }

    #[test]
    fn expiry_restarts_discovery() {
        let mut client = DhcpClient::new(MAC, None, 7);
        let lease = bind(&mut client, 0);
        let (out, events) = client.on_tick(lease.expires_at);
        assert_eq!(events, vec![DhcpEvent::Lost]);
        assert!(matches!(out[0], DhcpOutput::Broadcast(_)), "discover resent");
        assert!(!client.is_bound());
    }

    #[test]
    fn nak_drops_lease() {
        let mut client = DhcpClient::new(MAC, None, 7);
        bind(&mut client, 0);
        let (_, events) = client.on_message(&reply(&client, DhcpMessageType::Nak, None), 10);
        assert_eq!(events, vec![DhcpEvent::Lost]);
        assert!(!client.is_bound());
    }
}
