//! RFC 1071 Internet checksum.

use core::net::Ipv4Addr;

/// Accumulate big-endian 16-bit words into a running sum. An odd trailing
/// byte is padded with a zero on the right, per RFC 1071.
pub fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += (last as u32) << 8;
    }
    sum
}

/// Fold carries and complement.
pub fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum over an IPv4 header. Builders zero the checksum field first;
/// verifiers leave it in place, since a valid header sums to 0.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    fold(sum_words(header, 0))
}

/// TCP/UDP checksum over the IPv4 pseudo-header plus the full segment.
pub fn transport_checksum_ipv4(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    let mut sum = sum_words(&src.octets(), 0);
    sum = sum_words(&dst.octets(), sum);
    sum += protocol as u32;
    sum += segment.len() as u32;
    fold(sum_words(segment, sum))
}
