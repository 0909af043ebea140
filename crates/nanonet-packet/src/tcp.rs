use super::checksum;
use super::ipv4::Ipv4Protocol;
use super::ParseError;
use core::fmt;
use core::net::Ipv4Addr;
use core::ops::BitOr;

pub const HEADER_LEN: usize = 20;

const OPT_END: u8 = 0;
const OPT_NOP: u8 = 1;
const OPT_MSS: u8 = 2;
const OPT_WSCALE: u8 = 3;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags(pub u16);

impl TcpFlags {
    pub const FIN: Self = Self(0x01);
    pub const SYN: Self = Self(0x02);
    pub const RST: Self = Self(0x04);
    pub const PSH: Self = Self(0x08);
    pub const ACK: Self = Self(0x10);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TcpFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for (bit, name) in [
            (Self::FIN, "FIN"),
            (Self::SYN, "SYN"),
            (Self::RST, "RST"),
            (Self::PSH, "PSH"),
            (Self::ACK, "ACK"),
        ] {
            if self.contains(bit) {
                if any {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                any = true;
            }
        }
        if !any {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

/// Borrowed view over a TCP segment.
#[derive(Debug, Clone, Copy)]
pub struct TcpSegment<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> TcpSegment<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        let header_len = ((data[12] >> 4) as usize) * 4;
        if header_len < HEADER_LEN {
            return Err(ParseError::Invalid("tcp: bad data offset"));
        }
        if data.len() < header_len {
            return Err(ParseError::Truncated);
        }
        Ok(Self { data, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags((self.data[13] & 0x3f) as u16)
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes([self.data[14], self.data[15]])
    }

    pub fn options(&self) -> &'a [u8] {
        &self.data[HEADER_LEN..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..]
    }

    /// There is no zero sentinel for TCP; a computed checksum of 0 is sent
    /// as-is, so validation is a plain sum-to-zero check.
    pub fn checksum_valid_ipv4(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        checksum::transport_checksum_ipv4(src, dst, Ipv4Protocol::TCP, self.data) == 0
    }

    pub fn mss_option(&self) -> Option<u16> {
        self.find_option(OPT_MSS)
            .filter(|d| d.len() == 2)
            .map(|d| u16::from_be_bytes([d[0], d[1]]))
    }

    pub fn window_scale_option(&self) -> Option<u8> {
        self.find_option(OPT_WSCALE)
            .filter(|d| d.len() == 1)
            .map(|d| d[0])
    }

    fn find_option(&self, kind: u8) -> Option<&'a [u8]> {
        let opts = self.options();
        let mut i = 0;
        while i < opts.len() {
            match opts[i] {
                OPT_END => return None,
                OPT_NOP => i += 1,
                k => {
                    if i + 1 >= opts.len() {
                        return None;
                    }
                    let len = opts[i + 1] as usize;
                    if len < 2 || i + len > opts.len() {
                        return None;
                    }
                    if k == kind {
                        return Some(&opts[i + 2..i + len]);
                    }
                    i += len;
                }
            }
        }
        None
    }
}

/// Builds a checksummed TCP segment for an IPv4 pseudo-header. An MSS
/// option is emitted only when `mss` is set (SYN segments).
#[derive(Debug, Clone, Copy)]
pub struct TcpSegmentBuilder<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub mss: Option<u16>,
    pub payload: &'a [u8],
}

impl TcpSegmentBuilder<'_> {
    pub fn build_vec(&self) -> Vec<u8> {
        let opts_len = if self.mss.is_some() { 4 } else { 0 };
        let header_len = HEADER_LEN + opts_len;
        let mut out = Vec::with_capacity(header_len + self.payload.len());
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(((header_len / 4) as u8) << 4);
        out.push(self.flags.0 as u8);
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(&[0, 0]); // urgent pointer
        if let Some(mss) = self.mss {
            out.push(OPT_MSS);
            out.push(4);
            out.extend_from_slice(&mss.to_be_bytes());
        }
        out.extend_from_slice(self.payload);
        let csum = checksum::transport_checksum_ipv4(self.src, self.dst, Ipv4Protocol::TCP, &out);
        out[16..18].copy_from_slice(&csum.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn builder() -> TcpSegmentBuilder<'static> {
        TcpSegmentBuilder {
            src: SRC,
            dst: DST,
            src_port: 40000,
            dst_port: 80,
            seq: 0x01020304,
            ack: 0x0a0b0c0d,
            flags: TcpFlags::ACK,
            window: 8192,
            mss: None,
            payload: b"payload",
        }
    }

    #[test]
    fn roundtrip() {
        let bytes = builder().build_vec();
        let seg = TcpSegment::parse(&bytes).unwrap();
        assert_eq!(seg.src_port(), 40000);
        assert_eq!(seg.dst_port(), 80);
        assert_eq!(seg.seq(), 0x01020304);
        assert_eq!(seg.ack(), 0x0a0b0c0d);
        assert_eq!(seg.flags(), TcpFlags::ACK);
        assert_eq!(seg.window(), 8192);
        assert_eq!(seg.payload(), b"payload");
        assert!(seg.checksum_valid_ipv4(SRC, DST));
    }

    #[test]
    fn mss_option_on_syn() {
        let bytes = TcpSegmentBuilder {
            flags: TcpFlags::SYN,
            mss: Some(1460),
            payload: b"",
            ..builder()
        }
        .build_vec();
        let seg = TcpSegment::parse(&bytes).unwrap();
        assert_eq!(seg.mss_option(), Some(1460));
        assert_eq!(seg.window_scale_option(), None);
        assert_eq!(seg.payload(), b"");
        assert!(seg.checksum_valid_ipv4(SRC, DST));
    }

    #[test]
    fn option_walker_skips_nops() {
        // NOP, NOP, WSCALE(7), MSS(1400): 12 option bytes.
        let mut bytes = builder().build_vec();
        let opts = [
            OPT_NOP, OPT_NOP, OPT_WSCALE, 3, 7, OPT_MSS, 4, 0x05, 0x78, OPT_END, 0, 0,
        ];
        bytes.splice(HEADER_LEN..HEADER_LEN, opts.iter().copied());
        bytes[12] = (((HEADER_LEN + opts.len()) / 4) as u8) << 4;
        let seg = TcpSegment::parse(&bytes).unwrap();
        assert_eq!(seg.window_scale_option(), Some(7));
        assert_eq!(seg.mss_option(), Some(1400));
        assert_eq!(seg.payload(), b"payload");
    }

    #[test]
    fn corrupt_checksum_detected() {
        let mut bytes = builder().build_vec();
        *bytes.last_mut().unwrap() ^= 0x01;
        assert!(!TcpSegment::parse(&bytes).unwrap().checksum_valid_ipv4(SRC, DST));
    }

    #[test]
    fn bad_data_offset_rejected() {
        let mut bytes = builder().build_vec();
        bytes[12] = 0x10; // offset 4 words, below the fixed header
        assert!(matches!(
            TcpSegment::parse(&bytes),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn flags_debug_format() {
        assert_eq!(
            format!("{:?}", TcpFlags::SYN | TcpFlags::ACK),
            "SYN|ACK"
        );
    }
}
