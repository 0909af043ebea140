use super::ethernet::MacAddr;
use super::ParseError;
use core::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request,
    Reply,
}

impl ArpOperation {
    fn to_u16(self) -> u16 {
        match self {
            ArpOperation::Request => 1,
            ArpOperation::Reply => 2,
        }
    }
}

/// Ethernet/IPv4 ARP body. Other hardware/protocol combinations are
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub op: ArpOperation,
    pub sender_hw: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_hw: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub const LEN: usize = 28;

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::LEN {
            return Err(ParseError::Truncated);
        }
        let htype = u16::from_be_bytes([buf[0], buf[1]]);
        let ptype = u16::from_be_bytes([buf[2], buf[3]]);
        if htype != 1 || ptype != 0x0800 {
            return Err(ParseError::Invalid("arp: not ethernet/ipv4"));
        }
        if buf[4] != 6 || buf[5] != 4 {
            return Err(ParseError::Invalid("arp: bad address lengths"));
        }
        let op = match u16::from_be_bytes([buf[6], buf[7]]) {
            1 => ArpOperation::Request,
            2 => ArpOperation::Reply,
            _ => return Err(ParseError::Invalid("arp: unknown operation")),
        };
        Ok(Self {
            op,
            sender_hw: MacAddr(buf[8..14].try_into().unwrap()),
            sender_ip: Ipv4Addr::new(buf[14], buf[15], buf[16], buf[17]),
            target_hw: MacAddr(buf[18..24].try_into().unwrap()),
            target_ip: Ipv4Addr::new(buf[24], buf[25], buf[26], buf[27]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0x0800u16.to_be_bytes());
        out.push(6);
        out.push(4);
        out.extend_from_slice(&self.op.to_u16().to_be_bytes());
        out.extend_from_slice(&self.sender_hw.0);
        out.extend_from_slice(&self.sender_ip.octets());
        out.extend_from_slice(&self.target_hw.0);
        out.extend_from_slice(&self.target_ip.octets());
        out
    }

    /// Who-has broadcast probe for `target_ip`.
    pub fn request(sender_hw: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            op: ArpOperation::Request,
            sender_hw,
            sender_ip,
            target_hw: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Reply to `request`, claiming `sender_ip` at `sender_hw`.
    pub fn reply_to(request: &ArpPacket, sender_hw: MacAddr, sender_ip: Ipv4Addr) -> Self {
        Self {
            op: ArpOperation::Reply,
            sender_hw,
            sender_ip,
            target_hw: request.sender_hw,
            target_ip: request.sender_ip,
        }
    }
}
