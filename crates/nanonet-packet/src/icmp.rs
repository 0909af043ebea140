use super::checksum;
use super::ParseError;

const ECHO_REPLY: u8 = 0;
const ECHO_REQUEST: u8 = 8;

/// ICMP echo request/reply. Other ICMP types parse to `Invalid` and are
/// dropped by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpEcho<'a> {
    pub is_request: bool,
    pub id: u16,
    pub seq: u16,
    pub payload: &'a [u8],
}

impl<'a> IcmpEcho<'a> {
    pub const HEADER_LEN: usize = 8;

    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        let is_request = match buf[0] {
            ECHO_REQUEST => true,
            ECHO_REPLY => false,
            _ => return Err(ParseError::Invalid("icmp: not an echo message")),
        };
        if buf[1] != 0 {
            return Err(ParseError::Invalid("icmp: bad code"));
        }
        if checksum::fold(checksum::sum_words(buf, 0)) != 0 {
            return Err(ParseError::BadChecksum);
        }
        Ok(Self {
            is_request,
            id: u16::from_be_bytes([buf[4], buf[5]]),
            seq: u16::from_be_bytes([buf[6], buf[7]]),
            payload: &buf[Self::HEADER_LEN..],
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        out.push(if self.is_request { ECHO_REQUEST } else { ECHO_REPLY });
        out.push(0);
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(self.payload);
        let csum = checksum::fold(checksum::sum_words(&out, 0));
        out[2..4].copy_from_slice(&csum.to_be_bytes());
        out
    }

    /// Echo reply mirroring this request's id, seq and payload.
    pub fn reply(&self) -> IcmpEcho<'a> {
        IcmpEcho {
            is_request: false,
            ..*self
        }
    }
}
