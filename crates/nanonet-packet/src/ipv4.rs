use super::checksum;
use super::ParseError;
use core::net::Ipv4Addr;

pub struct Ipv4Protocol;

impl Ipv4Protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Packet<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    /// MF flag set or a nonzero fragment offset.
    pub is_fragment: bool,
    pub payload: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    pub const HEADER_LEN: usize = 20;

    /// Parse a header and slice out the payload. The header checksum is
    /// verified; options are accepted and skipped. `payload` honors the
    /// total-length field, so trailing Ethernet padding is trimmed.
    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        if buf[0] >> 4 != 4 {
            return Err(ParseError::Invalid("ipv4: bad version"));
        }
        let header_len = ((buf[0] & 0x0f) as usize) * 4;
        if header_len < Self::HEADER_LEN {
            return Err(ParseError::Invalid("ipv4: bad ihl"));
        }
        let total_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if total_len < header_len || buf.len() < total_len {
            return Err(ParseError::Truncated);
        }
        if checksum::ipv4_header_checksum(&buf[..header_len]) != 0 {
            return Err(ParseError::BadChecksum);
        }
        let frag = u16::from_be_bytes([buf[6], buf[7]]);
        Ok(Self {
            src: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            dst: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
            protocol: buf[9],
            ttl: buf[8],
            is_fragment: frag & 0x3fff != 0,
            payload: &buf[header_len..total_len],
        })
    }

    /// Optionless header with DF set, followed by `payload`.
    pub fn serialize(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        ttl: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let total_len = (Self::HEADER_LEN + payload.len()) as u16;
        let mut out = Vec::with_capacity(total_len as usize);
        out.push(0x45);
        out.push(0);
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // identification
        out.extend_from_slice(&0x4000u16.to_be_bytes()); // DF
        out.push(ttl);
        out.push(protocol);
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(&src.octets());
        out.extend_from_slice(&dst.octets());
        let csum = checksum::ipv4_header_checksum(&out[..Self::HEADER_LEN]);
        out[10..12].copy_from_slice(&csum.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let bytes = Ipv4Packet::serialize(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Protocol::UDP,
            64,
            b"data",
        );
        let pkt = Ipv4Packet::parse(&bytes).unwrap();
        assert_eq!(pkt.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(pkt.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(pkt.protocol, Ipv4Protocol::UDP);
        assert_eq!(pkt.ttl, 64);
        assert!(!pkt.is_fragment);
        assert_eq!(pkt.payload, b"data");
    }

    #[test]
    fn corrupt_header_rejected() {
        let mut bytes = Ipv4Packet::serialize(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Protocol::TCP,
            64,
            &[],
        );
        bytes[8] ^= 0xff;
        assert_eq!(Ipv4Packet::parse(&bytes), Err(ParseError::BadChecksum));
    }

    #[test]
    fn ethernet_padding_trimmed() {
        let mut bytes = Ipv4Packet::serialize(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Protocol::UDP,
            64,
            b"xy",
        );
        bytes.extend_from_slice(&[0u8; 24]); // pad to minimum frame size
        assert_eq!(Ipv4Packet::parse(&bytes).unwrap().payload, b"xy");
    }

    #[test]
    fn fragments_flagged() {
        let mut bytes = Ipv4Packet::serialize(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Protocol::UDP,
            64,
            b"frag",
        );
        bytes[6] = 0x20; // MF
        bytes[7] = 0x00;
        let csum = checksum::ipv4_header_checksum(&{
            let mut h = bytes[..20].to_vec();
            h[10] = 0;
            h[11] = 0;
            h
        });
        bytes[10..12].copy_from_slice(&csum.to_be_bytes());
        assert!(Ipv4Packet::parse(&bytes).unwrap().is_fragment);
    }
}
