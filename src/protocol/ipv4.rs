//! IPv4 protocol - RFC 791

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TTL given to datagrams the router originates
pub const DEFAULT_TTL: u8 = 64;

/// IPv4 protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Validate version, IHL and total length against the buffer.
///
/// Returns `(header_len, total_len)`.
fn check_lengths(buffer: &[u8]) -> Result<(usize, usize)> {
    if buffer.len() < MIN_HEADER_SIZE {
        return Err(Error::Parse("IPv4 header too short".into()));
    }

    if buffer[0] >> 4 != 4 {
        return Err(Error::Parse("not an IPv4 packet".into()));
    }

    let header_len = ((buffer[0] & 0x0F) as usize) * 4;
    if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
        return Err(Error::Parse(format!("bad IPv4 header length {}", header_len)));
    }

    let total_len = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
    if total_len < header_len || total_len > buffer.len() {
        return Err(Error::Parse(format!(
            "IPv4 total length {} does not fit {} byte buffer",
            total_len,
            buffer.len()
        )));
    }

    Ok((header_len, total_len))
}

/// Parsed IPv4 datagram (zero-copy reference)
///
/// The view is clipped to the datagram's total length, so link-layer
/// padding after the datagram is not visible through it.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let (header_len, total_len) = check_lengths(buffer)?;
        Ok(Self {
            buffer: &buffer[..total_len],
            header_len,
        })
    }

    pub fn tos(&self) -> u8 {
        self.buffer[1]
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6] & 0x1F, self.buffer[7]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..]
    }

    /// Validate header checksum
    pub fn validate_checksum(&self) -> bool {
        checksum(self.header()) == 0
    }

    /// Raw header bytes, options included
    pub fn header(&self) -> &'a [u8] {
        &self.buffer[..self.header_len]
    }

    /// The whole datagram: header and payload up to the total length
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }
}

/// Internet checksum (RFC 1071) over `data`.
///
/// Computing over a block whose checksum field is already filled in
/// yields zero when the block is intact.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Owned IPv4 datagram for in-place modification (TTL, addresses)
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    buffer: Vec<u8>,
    header_len: usize,
}

impl Ipv4Packet {
    /// Copy a datagram out of `data`, dropping any trailing padding
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (header_len, total_len) = check_lengths(data)?;
        Ok(Self {
            buffer: data[..total_len].to_vec(),
            header_len,
        })
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    /// Subtract `hops` from the TTL and refresh the checksum.
    ///
    /// Returns false, leaving the packet untouched, if the TTL would reach zero.
    pub fn decrement_ttl(&mut self, hops: u8) -> bool {
        if self.buffer[8] <= hops {
            return false;
        }

        self.buffer[8] -= hops;
        self.update_checksum();
        true
    }

    /// Set TTL and update checksum
    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer[8] = ttl;
        self.update_checksum();
    }

    /// Exchange source and destination addresses and update checksum
    pub fn swap_addresses(&mut self) {
        let (head, tail) = self.buffer.split_at_mut(16);
        head[12..16].swap_with_slice(&mut tail[..4]);
        self.update_checksum();
    }

    /// Recalculate and update header checksum
    pub fn update_checksum(&mut self) {
        self.buffer[10] = 0;
        self.buffer[11] = 0;

        let sum = checksum(&self.buffer[..self.header_len]);
        self.buffer[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Builder for datagrams the router originates (no options)
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    tos: u8,
    identification: u16,
    dont_fragment: bool,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            tos: 0,
            identification: 0,
            dont_fragment: false,
            ttl: DEFAULT_TTL,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn dont_fragment(mut self, df: bool) -> Self {
        self.dont_fragment = df;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = vec![0u8; MIN_HEADER_SIZE + self.payload.len()];

        // Version (4) + IHL (5 = 20 bytes, no options)
        buffer[0] = 0x45;
        buffer[1] = self.tos;
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        if self.dont_fragment {
            buffer[6] = 0x40;
        }
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());
        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.payload);

        let sum = checksum(&buffer[..MIN_HEADER_SIZE]);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_simple_packet() -> Vec<u8> {
        // src=192.168.1.1, dst=192.168.1.2, TTL=64, ICMP, 8 bytes payload
        let mut pkt = vec![
            0x45, // Version=4, IHL=5
            0x00, // TOS
            0x00, 0x1c, // Total length = 28
            0x12, 0x34, // Identification
            0x40, 0x00, // Flags=DF, Fragment offset=0
            0x40, // TTL=64
            0x01, // Protocol=ICMP
            0x00, 0x00, // Checksum (placeholder)
            192, 168, 1, 1, // Source
            192, 168, 1, 2, // Destination
        ];
        pkt.extend_from_slice(&[8, 0, 0, 0, 0, 1, 0, 1]);
        let sum = checksum(&pkt[..20]);
        pkt[10..12].copy_from_slice(&sum.to_be_bytes());
        pkt
    }

    #[test]
    fn test_protocol_from_u8() {
        assert_eq!(Protocol::from_u8(1), Some(Protocol::Icmp));
        assert_eq!(Protocol::from_u8(6), Some(Protocol::Tcp));
        assert_eq!(Protocol::from_u8(17), Some(Protocol::Udp));
        assert_eq!(Protocol::from_u8(89), None);
    }

    #[test]
    fn test_parse_simple() {
        let data = make_simple_packet();
        let ip = Ipv4Header::parse(&data).unwrap();

        assert_eq!(ip.header_len(), 20);
        assert_eq!(ip.total_length(), 28);
        assert_eq!(ip.identification(), 0x1234);
        assert_eq!(ip.ttl(), 64);
        assert_eq!(ip.protocol(), Protocol::Icmp as u8);
        assert_eq!(ip.src_addr(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(ip.dst_addr(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(ip.payload().len(), 8);
        assert!(ip.validate_checksum());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(Ipv4Header::parse(&[0x45; 19]).is_err());
    }

    #[test]
    fn test_parse_wrong_version() {
        let mut data = make_simple_packet();
        data[0] = 0x65;
        assert!(Ipv4Header::parse(&data).is_err());
    }

    #[test]
    fn test_parse_bad_ihl() {
        let mut data = make_simple_packet();
        data[0] = 0x44; // IHL=4 is below the minimum
        assert!(Ipv4Header::parse(&data).is_err());

        let mut data = make_simple_packet();
        data[0] = 0x4f; // 60 byte header in a 28 byte buffer
        assert!(Ipv4Header::parse(&data).is_err());
    }

    #[test]
    fn test_parse_total_length_exceeds_buffer() {
        let mut data = make_simple_packet();
        data[2..4].copy_from_slice(&100u16.to_be_bytes());
        assert!(Ipv4Header::parse(&data).is_err());
    }

    #[test]
    fn test_parse_ignores_link_padding() {
        let mut data = make_simple_packet();
        data.extend_from_slice(&[0u8; 18]);
        let ip = Ipv4Header::parse(&data).unwrap();
        assert_eq!(ip.as_bytes().len(), 28);
        assert_eq!(ip.payload().len(), 8);

        let pkt = Ipv4Packet::from_bytes(&data).unwrap();
        assert_eq!(pkt.as_bytes().len(), 28);
    }

    #[test]
    fn test_validate_checksum_bad() {
        let mut data = make_simple_packet();
        data[10] ^= 0xFF;
        let ip = Ipv4Header::parse(&data).unwrap();
        assert!(!ip.validate_checksum());
    }

    #[test]
    fn test_checksum_single_bit_flip_detected() {
        let data = make_simple_packet();
        for bit in 0..(MIN_HEADER_SIZE * 8) {
            let mut corrupted = data.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert_ne!(
                checksum(&corrupted[..MIN_HEADER_SIZE]),
                0,
                "bit {} flip not detected",
                bit
            );
        }
    }

    #[test]
    fn test_checksum_known_good() {
        // Example header from RFC 1071 style walkthroughs
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(checksum(&header), 0);
    }

    #[test]
    fn test_checksum_odd_length() {
        // Trailing byte is padded with zero on the right
        assert_eq!(checksum(&[0x01]), !0x0100);
    }

    #[test]
    fn test_packet_decrement_ttl() {
        let mut pkt = Ipv4Packet::from_bytes(&make_simple_packet()).unwrap();

        assert!(pkt.decrement_ttl(1));
        assert_eq!(pkt.ttl(), 63);
        assert!(Ipv4Header::parse(pkt.as_bytes()).unwrap().validate_checksum());

        assert!(pkt.decrement_ttl(2));
        assert_eq!(pkt.ttl(), 61);
    }

    #[test]
    fn test_packet_decrement_ttl_expires() {
        let mut data = make_simple_packet();
        data[8] = 1;
        let mut pkt = Ipv4Packet::from_bytes(&data).unwrap();
        assert!(!pkt.decrement_ttl(1));
        assert_eq!(pkt.ttl(), 1);

        let mut pkt = Ipv4Packet::from_bytes(&make_simple_packet()).unwrap();
        assert!(!pkt.decrement_ttl(64));
    }

    #[test]
    fn test_packet_swap_addresses() {
        let mut pkt = Ipv4Packet::from_bytes(&make_simple_packet()).unwrap();
        pkt.swap_addresses();

        assert_eq!(pkt.src_addr(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(pkt.dst_addr(), Ipv4Addr::new(192, 168, 1, 1));
        assert!(Ipv4Header::parse(pkt.as_bytes()).unwrap().validate_checksum());
    }

    #[test]
    fn test_builder() {
        let data = Ipv4Builder::new()
            .tos(0x10)
            .identification(7)
            .protocol(Protocol::Udp as u8)
            .src_addr(Ipv4Addr::new(10, 0, 0, 1))
            .dst_addr(Ipv4Addr::new(10, 0, 0, 2))
            .payload(&[1, 2, 3, 4])
            .build();

        let ip = Ipv4Header::parse(&data).unwrap();
        assert_eq!(ip.tos(), 0x10);
        assert_eq!(ip.identification(), 7);
        assert_eq!(ip.ttl(), DEFAULT_TTL);
        assert_eq!(ip.total_length(), 24);
        assert_eq!(ip.fragment_offset(), 0);
        assert_eq!(data[6], 0);
        assert_eq!(ip.payload(), &[1, 2, 3, 4]);
        assert!(ip.validate_checksum());
    }
}
