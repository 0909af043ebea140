use crate::Millis;
use core::net::Ipv4Addr;
use nanonet_packet::MacAddr;
use tracing::trace;

const CAPACITY: usize = 16;
const ENTRY_TTL: Millis = 60_000;
const PROBE_TIMEOUT: Millis = 1_000;

#[derive(Debug, Clone, Copy)]
struct Entry {
    ip: Ipv4Addr,
    mac: MacAddr,
    expires_at: Millis,
}

#[derive(Debug)]
struct Probe {
    ip: Ipv4Addr,
    deadline: Millis,
    parked: Option<Vec<u8>>,
}

/// Bounded IPv4 neighbor table with outstanding-probe tracking.
///
/// At most one ARP request per address is in flight at a time, and at most
/// one frame is parked awaiting each resolution; later frames for the same
/// unresolved address are dropped and recovered by retransmission.
#[derive(Debug, Default)]
pub struct ArpCache {
    entries: Vec<Entry>,
    probes: Vec<Probe>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, ip: Ipv4Addr, now: Millis) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|e| e.ip == ip && e.expires_at > now)
            .map(|e| e.mac)
    }

    /// Insert or refresh a mapping. Replies to our probes and unsolicited
    /// announcements are both learned. Returns a frame that was parked
    /// waiting for this resolution, if any.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr, now: Millis) -> Option<Vec<u8>> {
        let expires_at = now + ENTRY_TTL;
        match self.entries.iter_mut().find(|e| e.ip == ip) {
            Some(entry) => {
                entry.mac = mac;
                entry.expires_at = expires_at;
            }
            None => {
                if self.entries.len() >= CAPACITY {
                    // evict the entry closest to expiry
                    if let Some(oldest) = self
                        .entries
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.expires_at)
                        .map(|(i, _)| i)
                    {
                        self.entries.swap_remove(oldest);
                    }
                }
                self.entries.push(Entry {
                    ip,
                    mac,
                    expires_at,
                });
            }
        }
        trace!(ip = %ip, mac = ?mac, "arp learned");
        let idx = self.probes.iter().position(|p| p.ip == ip)?;
        self.probes.swap_remove(idx).parked
    }

    /// Register interest in `ip`. Returns true when the caller should put an
    /// ARP request on the wire; false while a probe is already outstanding.
    pub fn probe(&mut self, ip: Ipv4Addr, now: Millis) -> bool {
        if self.probes.iter().any(|p| p.ip == ip) {
            return false;
        }
        self.probes.push(Probe {
            ip,
            deadline: now + PROBE_TIMEOUT,
            parked: None,
        });
        true
    }

    /// Park one frame until `ip` resolves. A frame already waiting wins;
    /// the newcomer is dropped.
    pub fn park(&mut self, ip: Ipv4Addr, frame: Vec<u8>) {
        if let Some(probe) = self.probes.iter_mut().find(|p| p.ip == ip) {
            if probe.parked.is_none() {
                probe.parked = Some(frame);
            }
        }
    }

    /// Drop expired entries and timed-out probes. Returns the addresses
    /// whose probes went unanswered, parked frames discarded.
    pub fn sweep(&mut self, now: Millis) -> Vec<Ipv4Addr> {
        self.entries.retain(|e| e.expires_at > now);
        let mut failed = Vec::new();
        self.probes.retain(|p| {
            if p.deadline <= now {
                failed.push(p.ip);
                false
            } else {
                true
            }
        });
        failed
    }

    pub fn is_probing(&self, ip: Ipv4Addr) -> bool {
        self.probes.iter().any(|p| p.ip == ip)
    }
}
