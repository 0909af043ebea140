use super::ethernet::MacAddr;
use super::ParseError;
use core::net::Ipv4Addr;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

const MAGIC: u32 = 0x6382_5363;
const OPTIONS_OFFSET: usize = 240;
const MAGIC_OFFSET: usize = 236;

const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_HOSTNAME: u8 = 12;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_LIST: u8 = 55;
const OPT_END: u8 = 255;
const OPT_PAD: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
}

impl DhcpMessageType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            _ => return None,
        })
    }
}

/// Options relevant to the client, collected in one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    pub message_type: Option<DhcpMessageType>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub lease_secs: Option<u32>,
    pub server_id: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
}

/// Server-to-client BOOTP/DHCP message, parsed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpMessage {
    pub is_reply: bool,
    pub xid: u32,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    pub options: DhcpOptions,
}

impl DhcpMessage {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < OPTIONS_OFFSET {
            return Err(ParseError::Truncated);
        }
        let is_reply = match buf[0] {
            1 => false,
            2 => true,
            _ => return Err(ParseError::Invalid("dhcp: bad op")),
        };
        let magic = u32::from_be_bytes([
            buf[MAGIC_OFFSET],
            buf[MAGIC_OFFSET + 1],
            buf[MAGIC_OFFSET + 2],
            buf[MAGIC_OFFSET + 3],
        ]);
        if magic != MAGIC {
            return Err(ParseError::Invalid("dhcp: bad magic cookie"));
        }
        Ok(Self {
            is_reply,
            xid: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            yiaddr: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
            siaddr: Ipv4Addr::new(buf[20], buf[21], buf[22], buf[23]),
            chaddr: MacAddr(buf[28..34].try_into().unwrap()),
            options: parse_options(&buf[OPTIONS_OFFSET..]),
        })
    }

    /// DISCOVER broadcast opening the lease negotiation.
    pub fn serialize_discover(xid: u32, mac: MacAddr) -> Vec<u8> {
        let mut out = bootp_request(xid, mac, Ipv4Addr::UNSPECIFIED, true);
        push_type(&mut out, 1);
        push_param_list(&mut out);
        out.push(OPT_END);
        out
    }

    /// REQUEST for an offered address, naming the chosen server.
    pub fn serialize_request(
        xid: u32,
        mac: MacAddr,
        requested: Ipv4Addr,
        server: Ipv4Addr,
        hostname: Option<&str>,
    ) -> Vec<u8> {
        let mut out = bootp_request(xid, mac, Ipv4Addr::UNSPECIFIED, true);
        push_type(&mut out, 3);
        out.push(OPT_REQUESTED_IP);
        out.push(4);
        out.extend_from_slice(&requested.octets());
        out.push(OPT_SERVER_ID);
        out.push(4);
        out.extend_from_slice(&server.octets());
        if let Some(name) = hostname {
            let name = &name.as_bytes()[..name.len().min(255)];
            out.push(OPT_HOSTNAME);
            out.push(name.len() as u8);
            out.extend_from_slice(name);
        }
        push_param_list(&mut out);
        out.push(OPT_END);
        out
    }

    /// Renewal REQUEST from a bound client: ciaddr carries our address and
    /// the message goes out unicast, no broadcast flag.
    pub fn serialize_renew(xid: u32, mac: MacAddr, our_ip: Ipv4Addr) -> Vec<u8> {
        let mut out = bootp_request(xid, mac, our_ip, false);
        push_type(&mut out, 3);
        push_param_list(&mut out);
        out.push(OPT_END);
        out
    }
}

fn bootp_request(xid: u32, mac: MacAddr, ciaddr: Ipv4Addr, broadcast: bool) -> Vec<u8> {
    let mut out = vec![0u8; OPTIONS_OFFSET];
    out[0] = 1; // BOOTREQUEST
    out[1] = 1; // ethernet
    out[2] = 6;
    out[4..8].copy_from_slice(&xid.to_be_bytes());
    if broadcast {
        out[10] = 0x80;
    }
    out[12..16].copy_from_slice(&ciaddr.octets());
    out[28..34].copy_from_slice(&mac.0);
    out[MAGIC_OFFSET..OPTIONS_OFFSET].copy_from_slice(&MAGIC.to_be_bytes());
    out
}

fn push_type(out: &mut Vec<u8>, t: u8) {
    out.push(OPT_MESSAGE_TYPE);
    out.push(1);
    out.push(t);
}

fn push_param_list(out: &mut Vec<u8>) {
    out.push(OPT_PARAM_LIST);
    out.push(4);
    out.extend_from_slice(&[OPT_SUBNET_MASK, OPT_ROUTER, OPT_DNS, OPT_LEASE_TIME]);
}

fn parse_options(opts: &[u8]) -> DhcpOptions {
    let mut parsed = DhcpOptions::default();
    let mut i = 0;
    while i < opts.len() {
        match opts[i] {
            OPT_END => break,
            OPT_PAD => i += 1,
            kind => {
                if i + 1 >= opts.len() {
                    break;
                }
                let len = opts[i + 1] as usize;
                if i + 2 + len > opts.len() {
                    break;
                }
                let data = &opts[i + 2..i + 2 + len];
                match (kind, len) {
                    (OPT_MESSAGE_TYPE, 1) => parsed.message_type = DhcpMessageType::from_u8(data[0]),
                    (OPT_SUBNET_MASK, 4) => {
                        parsed.subnet_mask = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
                    }
                    (OPT_ROUTER, l) if l >= 4 => {
                        parsed.router = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
                    }
                    (OPT_DNS, l) if l >= 4 => {
                        parsed.dns = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
                    }
                    (OPT_LEASE_TIME, 4) => {
                        parsed.lease_secs =
                            Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
                    }
                    (OPT_SERVER_ID, 4) => {
                        parsed.server_id = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
                    }
                    _ => {}
                }
                i += 2 + len;
            }
        }
    }
    parsed
}
