//! ICMP (Internet Control Message Protocol) - RFC 792

use super::ipv4::checksum;
use crate::{Error, Result};

/// ICMP header size (type, code, checksum, rest-of-header word)
pub const ICMP_HEADER_SIZE: usize = 8;

/// Bytes of the offending datagram quoted in an error message
/// (IPv4 header without options + 8 bytes of payload)
pub const ICMP_DATA_SIZE: usize = 28;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    SourceQuench = 4,
    Redirect = 5,
    EchoRequest = 8,
    TimeExceeded = 11,
    ParameterProblem = 12,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            4 => Some(IcmpType::SourceQuench),
            5 => Some(IcmpType::Redirect),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            12 => Some(IcmpType::ParameterProblem),
            _ => None,
        }
    }

    /// Error messages quote another datagram and must never trigger
    /// an error message themselves.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            IcmpType::DestinationUnreachable
                | IcmpType::SourceQuench
                | IcmpType::Redirect
                | IcmpType::TimeExceeded
                | IcmpType::ParameterProblem
        )
    }
}

/// Destination Unreachable codes (RFC 792)
pub mod dest_unreachable {
    /// Network unreachable
    pub const NET_UNREACHABLE: u8 = 0;
    /// Host unreachable
    pub const HOST_UNREACHABLE: u8 = 1;
    /// Protocol unreachable
    pub const PROTOCOL_UNREACHABLE: u8 = 2;
    /// Port unreachable
    pub const PORT_UNREACHABLE: u8 = 3;
}

/// Time Exceeded codes (RFC 792)
pub mod time_exceeded {
    /// TTL exceeded in transit
    pub const TTL_EXCEEDED: u8 = 0;
}

/// Parsed ICMP message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// For Echo Request/Reply: identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// For Echo Request/Reply: sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[ICMP_HEADER_SIZE..]
    }

    /// Validate the checksum over the whole message
    pub fn validate_checksum(&self) -> bool {
        checksum(self.buffer) == 0
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == IcmpType::EchoRequest as u8
    }

    pub fn is_error(&self) -> bool {
        IcmpType::from_u8(self.icmp_type()).is_some_and(IcmpType::is_error)
    }
}

/// Build an ICMP Echo Reply body from an Echo Request body.
///
/// Identifier, sequence number and data are carried over unchanged.
pub fn build_echo_reply(request: &[u8]) -> Result<Vec<u8>> {
    if request.len() < ICMP_HEADER_SIZE {
        return Err(Error::Parse("ICMP request too short".into()));
    }

    let mut reply = request.to_vec();
    reply[0] = IcmpType::EchoReply as u8;
    reply[1] = 0;
    reply[2] = 0;
    reply[3] = 0;

    let sum = checksum(&reply);
    reply[2..4].copy_from_slice(&sum.to_be_bytes());

    Ok(reply)
}

/// Build an error message body (Destination Unreachable, Time Exceeded).
///
/// The rest-of-header word is left zero and the first `ICMP_DATA_SIZE`
/// bytes of `original` are quoted, zero-padded if it is shorter.
pub fn build_error(icmp_type: IcmpType, code: u8, original: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_SIZE + ICMP_DATA_SIZE];
    packet[0] = icmp_type as u8;
    packet[1] = code;

    let quoted = original.len().min(ICMP_DATA_SIZE);
    packet[ICMP_HEADER_SIZE..ICMP_HEADER_SIZE + quoted].copy_from_slice(&original[..quoted]);

    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());

    packet
}
