use super::checksum;
use super::ipv4::Ipv4Protocol;
use super::ParseError;
use core::net::Ipv4Addr;

pub const HEADER_LEN: usize = 8;

/// Borrowed view over a UDP datagram.
#[derive(Debug, Clone, Copy)]
pub struct UdpDatagram<'a> {
    data: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if length < HEADER_LEN || data.len() < length {
            return Err(ParseError::Truncated);
        }
        Ok(Self {
            data: &data[..length],
        })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.data[6], self.data[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[HEADER_LEN..]
    }

    /// A zero on the wire means the sender skipped the checksum, which is
    /// legal for UDP over IPv4.
    pub fn checksum_valid_ipv4(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        checksum::transport_checksum_ipv4(src, dst, Ipv4Protocol::UDP, self.data) == 0
    }
}

/// Builds a checksummed UDP datagram for an IPv4 pseudo-header.
#[derive(Debug, Clone, Copy)]
pub struct UdpDatagramBuilder<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl UdpDatagramBuilder<'_> {
    pub fn build_vec(&self) -> Vec<u8> {
        let length = (HEADER_LEN + self.payload.len()) as u16;
        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(self.payload);
        let mut csum =
            checksum::transport_checksum_ipv4(self.src, self.dst, Ipv4Protocol::UDP, &out);
        // 0 is the no-checksum sentinel, so a computed 0 goes out as 0xffff.
        if csum == 0 {
            csum = 0xffff;
        }
        out[6..8].copy_from_slice(&csum.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);

    #[test]
    fn roundtrip() {
        let bytes = UdpDatagramBuilder {
            src: SRC,
            dst: DST,
            src_port: 49152,
            dst_port: 53,
            payload: b"query",
        }
        .build_vec();
        let dgram = UdpDatagram::parse(&bytes).unwrap();
        assert_eq!(dgram.src_port(), 49152);
        assert_eq!(dgram.dst_port(), 53);
        assert_eq!(dgram.payload(), b"query");
        assert!(dgram.checksum_valid_ipv4(SRC, DST));
    }

    #[test]
    fn zero_checksum_accepted() {
        let mut bytes = UdpDatagramBuilder {
            src: SRC,
            dst: DST,
            src_port: 1,
            dst_port: 2,
            payload: b"x",
        }
        .build_vec();
        bytes[6] = 0;
        bytes[7] = 0;
        assert!(UdpDatagram::parse(&bytes)
            .unwrap()
            .checksum_valid_ipv4(SRC, DST));
    }

    #[test]
    fn corrupt_checksum_rejected() {
        let mut bytes = UdpDatagramBuilder {
            src: SRC,
            dst: DST,
            src_port: 1,
            dst_port: 2,
            payload: b"hello",
        }
        .build_vec();
        bytes[8] ^= 0x01;
        assert!(!UdpDatagram::parse(&bytes)
            .unwrap()
            .checksum_valid_ipv4(SRC, DST));
    }

    #[test]
    fn length_field_bounds_payload() {
        let bytes = UdpDatagramBuilder {
            src: SRC,
            dst: DST,
            src_port: 1,
            dst_port: 2,
            payload: b"ab",
        }
        .build_vec();
        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0u8; 16]);
        assert_eq!(UdpDatagram::parse(&padded).unwrap().payload(), b"ab");
        assert!(matches!(
            UdpDatagram::parse(&bytes[..7]),
            Err(ParseError::Truncated)
        ));
    }
}
