//! Frames the router originates: ICMP replies/errors and ARP

use super::interface::{Interface, InterfaceList};
use super::routing::RoutingTable;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::icmp::{build_echo_reply, build_error, dest_unreachable, IcmpPacket, IcmpType};
use crate::protocol::ipv4::{Ipv4Builder, Ipv4Header, Ipv4Packet, Protocol, DEFAULT_TTL};
use crate::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// An ICMP message ready for the forwarding path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    /// Ethernet frame with zeroed link addresses
    pub frame: Vec<u8>,
    /// Address to resolve on `interface`
    pub next_hop: Ipv4Addr,
    pub interface: String,
}

/// Whether an error message may be sent about `original`.
///
/// Never about an ICMP error, a non-initial fragment, a datagram we
/// originated ourselves, or one whose source cannot be answered.
fn may_report(interfaces: &InterfaceList, original: &Ipv4Header<'_>) -> bool {
    if original.fragment_offset() != 0 {
        return false;
    }

    let src = original.src_addr();
    if src.is_unspecified() || src.is_broadcast() || src.is_multicast() || src.is_loopback() {
        return false;
    }
    if interfaces.owning(src).is_some() {
        return false;
    }

    if original.protocol() == Protocol::Icmp as u8 {
        match IcmpPacket::parse(original.payload()) {
            Ok(icmp) if !icmp.is_error() => {}
            _ => return false,
        }
    }

    true
}

/// Build an ICMP message answering `original`.
///
/// Echo replies mirror the request; Destination Unreachable and Time
/// Exceeded quote the head of `original`. The message is routed back to
/// the original sender; if no route exists it is abandoned and `None` is
/// returned.
pub fn make_icmp(
    interfaces: &InterfaceList,
    routes: &RoutingTable,
    original: &Ipv4Header<'_>,
    icmp_type: IcmpType,
    code: u8,
) -> Option<IcmpMessage> {
    let Some(route) = routes.longest_prefix_match(original.src_addr()) else {
        debug!(
            "No route back to {}, not sending ICMP type {}",
            original.src_addr(),
            icmp_type as u8
        );
        return None;
    };
    let egress = interfaces.get(&route.interface)?;

    let datagram = match icmp_type {
        IcmpType::EchoReply => echo_reply(original)?,
        IcmpType::DestinationUnreachable | IcmpType::TimeExceeded => {
            if !may_report(interfaces, original) {
                trace!(
                    "Suppressing ICMP type {} about datagram from {}",
                    icmp_type as u8,
                    original.src_addr()
                );
                return None;
            }
            error_datagram(egress, original, icmp_type, code)
        }
        other => {
            debug!("ICMP type {:?} is not generated", other);
            return None;
        }
    };

    let frame = FrameBuilder::new()
        .dst_mac(MacAddr::ZERO)
        .src_mac(MacAddr::ZERO)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&datagram)
        .build();

    Some(IcmpMessage {
        frame,
        next_hop: route.next_hop(original.src_addr()),
        interface: route.interface.clone(),
    })
}

fn echo_reply(request: &Ipv4Header<'_>) -> Option<Vec<u8>> {
    let body = build_echo_reply(request.payload()).ok()?;

    let mut reply = Ipv4Packet::from_bytes(request.as_bytes()).ok()?;
    reply.payload_mut().copy_from_slice(&body);
    reply.swap_addresses();
    reply.set_ttl(DEFAULT_TTL);

    Some(reply.into_bytes())
}

fn error_datagram(
    egress: &Interface,
    original: &Ipv4Header<'_>,
    icmp_type: IcmpType,
    code: u8,
) -> Vec<u8> {
    // Port unreachable is reported by the host that was addressed
    let src = if icmp_type == IcmpType::DestinationUnreachable
        && code == dest_unreachable::PORT_UNREACHABLE
    {
        original.dst_addr()
    } else {
        egress.ip
    };

    Ipv4Builder::new()
        .tos(original.tos())
        .identification(original.identification())
        .ttl(DEFAULT_TTL)
        .protocol(Protocol::Icmp as u8)
        .src_addr(src)
        .dst_addr(original.src_addr())
        .payload(&build_error(icmp_type, code, original.as_bytes()))
        .build()
}

/// Build an ARP frame sent from `iface`.
///
/// Requests are broadcast with a zero target hardware address; replies are
/// unicast to `target_mac`.
pub fn make_arp(iface: &Interface, target_mac: MacAddr, target_ip: Ipv4Addr, op: ArpOp) -> Vec<u8> {
    let (dst, arp) = match op {
        ArpOp::Request => (
            MacAddr::BROADCAST,
            ArpPacket::request(iface.mac, iface.ip, target_ip),
        ),
        ArpOp::Reply => (
            target_mac,
            ArpPacket::reply(iface.mac, iface.ip, target_mac, target_ip),
        ),
    };

    FrameBuilder::new()
        .dst_mac(dst)
        .src_mac(iface.mac)
        .ethertype(EtherType::Arp as u16)
        .payload(&arp.to_bytes())
        .build()
}
