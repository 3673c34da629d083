//! ARP cache, pending requests and the sweeper, driven with simulated time

mod common;

use common::*;
use srouter::dataplane::{ArpCacheConfig, RouterConfig};
use srouter::protocol::arp::{ArpOp, ArpPacket};
use srouter::protocol::ethernet::{Frame, FrameBuilder};
use srouter::protocol::icmp::IcmpPacket;
use srouter::protocol::ipv4::{Ipv4Header, Protocol};
use srouter::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use std::time::Duration;

const SECOND: Duration = Duration::from_secs(1);
const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 9);
const SERVER_MAC: MacAddr = MacAddr([0x0a, 0, 0, 0, 2, 0x09]);

fn arp_of(frame: &[u8]) -> ArpPacket {
    let eth = Frame::parse(frame).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Arp as u16);
    ArpPacket::parse(eth.payload()).unwrap()
}

fn is_arp_request_for(frame: &[u8], ip: Ipv4Addr) -> bool {
    let eth = Frame::parse(frame).unwrap();
    eth.ethertype() == EtherType::Arp as u16
        && eth.dst_mac().is_broadcast()
        && ArpPacket::parse(eth.payload())
            .map(|a| a.operation == ArpOp::Request && a.target_ip == ip)
            .unwrap_or(false)
}

// ==================== queue and replay ====================

#[test]
fn queued_frames_sent_once_on_reply() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");

    for _ in 0..3 {
        lab.receive(&udp_from_host(SERVER_IP, 64), "eth0");
    }

    let out = lab.sent();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].interface, "eth1");
    let request = arp_of(&out[0].frame);
    assert_eq!(request.operation, ArpOp::Request);
    assert_eq!(request.sender_mac, ETH1_MAC);
    assert_eq!(request.sender_ip, ETH1_IP);
    assert_eq!(request.target_mac, MacAddr::ZERO);
    assert_eq!(request.target_ip, SERVER_IP);

    lab.resolve(SERVER_IP, SERVER_MAC, "eth1");

    let out = lab.sent();
    assert_eq!(out.len(), 3);
    for frame in &out {
        assert_eq!(frame.interface, "eth1");
        let eth = Frame::parse(&frame.frame).unwrap();
        assert_eq!(eth.src_mac(), ETH1_MAC);
        assert_eq!(eth.dst_mac(), SERVER_MAC);
        let bytes = ip_bytes(&frame.frame);
        assert_eq!(Ipv4Header::parse(&bytes).unwrap().ttl(), 63);
    }

    assert!(lab.router.arp_cache().pending().is_empty());
    assert_eq!(lab.metrics.arp_frames_queued.get(), 3);
    assert_eq!(lab.metrics.arp_frames_replayed.get(), 3);

    // Nothing left for the sweeper to do
    lab.tick(SECOND);
    assert!(lab.sent().is_empty());
}

#[test]
fn undeliverable_echo_reply_is_dropped_quietly() {
    let mut lab = Lab::new();
    let ping = datagram(HOST_IP, ETH0_IP, 64, Protocol::Icmp, &echo_request(7, 1, b"x"));
    lab.receive(&ether(ETH0_MAC, HOST_MAC, EtherType::Ipv4, &ping), "eth0");

    let mut out = lab.sent();
    for _ in 0..6 {
        lab.tick(SECOND);
        out.extend(lab.sent());
    }

    assert_eq!(out.len(), 5);
    assert!(out
        .iter()
        .all(|f| f.interface == "eth0" && is_arp_request_for(&f.frame, HOST_IP)));
    assert!(!out.iter().any(|f| is_arp_request_for(&f.frame, ETH0_IP)));
    assert!(lab.router.arp_cache().pending().is_empty());
    assert_eq!(lab.metrics.arp_resolution_failures.get(), 1);
}

#[test]
fn silent_host_gets_five_requests_then_host_unreachable() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");

    let original = udp_from_host(SERVER_IP, 64);
    lab.receive(&original, "eth0");

    let mut requests = lab.sent();
    for _ in 0..4 {
        lab.tick(SECOND);
        requests.extend(lab.sent());
    }
    assert_eq!(requests.len(), 5);
    assert!(requests
        .iter()
        .all(|f| f.interface == "eth1" && is_arp_request_for(&f.frame, SERVER_IP)));

    lab.tick(SECOND);
    let out = lab.sent();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].interface, "eth0");
    assert_eq!(Frame::parse(&out[0].frame).unwrap().dst_mac(), HOST_MAC);

    let bytes = ip_bytes(&out[0].frame);
    let ip = Ipv4Header::parse(&bytes).unwrap();
    assert_eq!(ip.src_addr(), ETH0_IP);
    assert_eq!(ip.dst_addr(), HOST_IP);
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!((icmp.icmp_type(), icmp.code()), (3, 1));
    assert!(icmp.validate_checksum());

    // The quoted header names the unreachable destination
    let quoted = icmp.payload();
    assert_eq!(&quoted[16..20], &SERVER_IP.octets());

    assert!(lab.router.arp_cache().pending().is_empty());
    assert_eq!(lab.metrics.arp_requests_sent.get(), 5);
    assert_eq!(lab.metrics.arp_resolution_failures.get(), 1);

    lab.tick(SECOND);
    assert!(lab.sent().is_empty());
}

#[test]
fn host_unreachable_for_every_queued_frame() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");
    lab.receive(&udp_from_host(SERVER_IP, 64), "eth0");
    lab.receive(&udp_from_host(SERVER_IP, 32), "eth0");
    lab.sent();

    for _ in 0..5 {
        lab.tick(SECOND);
    }

    let unreachable: Vec<_> = lab
        .sent()
        .into_iter()
        .filter(|f| f.interface == "eth0")
        .collect();
    assert_eq!(unreachable.len(), 2);
}

#[test]
fn retries_not_sent_before_interval() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");
    lab.receive(&udp_from_host(SERVER_IP, 64), "eth0");
    assert_eq!(lab.sent().len(), 1);

    lab.tick(Duration::from_millis(400));
    lab.tick(Duration::from_millis(400));
    assert!(lab.sent().is_empty());

    lab.tick(Duration::from_millis(200));
    assert_eq!(lab.sent().len(), 1);
}

#[test]
fn resolution_during_retry_window_is_replayed_by_sweeper() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");

    // Mapping installed before the frame was parked, as if the reply raced
    // the lookup
    lab.router.arp_cache().insert(SERVER_MAC, SERVER_IP);
    let frame = FrameBuilder::new()
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&ip_bytes(&udp_from_host(SERVER_IP, 63)))
        .build();
    lab.router.arp_cache().queue_request(SERVER_IP, &frame, "eth1");

    lab.tick(SECOND);

    let out = lab.sent();
    assert_eq!(out.len(), 1);
    let eth = Frame::parse(&out[0].frame).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Ipv4 as u16);
    assert_eq!(eth.dst_mac(), SERVER_MAC);
    assert_eq!(eth.src_mac(), ETH1_MAC);
    assert!(lab.router.arp_cache().pending().is_empty());
}

// ==================== cache lifetime ====================

#[test]
fn entry_expires_after_ttl() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");
    lab.resolve(SERVER_IP, SERVER_MAC, "eth1");

    lab.tick(Duration::from_secs(14));
    assert!(lab.router.arp_cache().lookup(SERVER_IP).is_some());

    lab.tick(SECOND);
    assert!(lab.router.arp_cache().lookup(SERVER_IP).is_none());
    assert_eq!(lab.metrics.arp_entries_expired.get(), 2);

    // Traffic to the expired neighbor has to resolve again
    lab.receive(&udp_from_host(SERVER_IP, 64), "eth0");
    let out = lab.sent();
    assert_eq!(out.len(), 1);
    assert!(is_arp_request_for(&out[0].frame, SERVER_IP));
}

#[test]
fn refreshed_entry_lives_on() {
    let mut lab = Lab::new();
    lab.resolve(SERVER_IP, SERVER_MAC, "eth1");

    lab.tick(Duration::from_secs(10));
    lab.resolve(SERVER_IP, SERVER_MAC, "eth1");
    lab.tick(Duration::from_secs(10));

    assert!(lab.router.arp_cache().lookup(SERVER_IP).is_some());
}

#[test]
fn full_cache_evicts_oldest() {
    let config = RouterConfig {
        arp: ArpCacheConfig {
            capacity: 2,
            ..ArpCacheConfig::default()
        },
        ..RouterConfig::default()
    };
    let mut lab = Lab::build(routes(), config);

    let hosts: Vec<(Ipv4Addr, MacAddr)> = (1..=3)
        .map(|i| (Ipv4Addr::new(10, 0, 2, 100 + i), MacAddr([0x0a, 0, 0, 0, 3, i])))
        .collect();
    for (ip, mac) in &hosts {
        lab.clock.advance(SECOND);
        lab.resolve(*ip, *mac, "eth1");
    }

    let cache = lab.router.arp_cache();
    assert_eq!(cache.len(), 2);
    assert!(cache.lookup(hosts[0].0).is_none());
    assert_eq!(cache.lookup(hosts[1].0).unwrap().mac, hosts[1].1);
    assert_eq!(cache.lookup(hosts[2].0).unwrap().mac, hosts[2].1);
}

// ==================== ARP input ====================

#[test]
fn request_for_our_address_answered() {
    let mut lab = Lab::new();
    let request = ArpPacket::request(HOST_MAC, HOST_IP, ETH0_IP);

    lab.receive(&arp_frame(&request, MacAddr::BROADCAST), "eth0");

    let out = lab.sent();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].interface, "eth0");
    let eth = Frame::parse(&out[0].frame).unwrap();
    assert_eq!(eth.dst_mac(), HOST_MAC);
    let reply = arp_of(&out[0].frame);
    assert_eq!(reply.operation, ArpOp::Reply);
    assert_eq!(reply.sender_mac, ETH0_MAC);
    assert_eq!(reply.sender_ip, ETH0_IP);
    assert_eq!(reply.target_mac, HOST_MAC);
    assert_eq!(reply.target_ip, HOST_IP);

    // The requester is learned along the way
    assert_eq!(lab.router.arp_cache().lookup(HOST_IP).unwrap().mac, HOST_MAC);
}

#[test]
fn request_releases_frames_waiting_on_requester() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");
    lab.receive(&udp_from_host(SERVER_IP, 64), "eth0");
    lab.sent();

    let request = ArpPacket::request(SERVER_MAC, SERVER_IP, ETH1_IP);
    lab.receive(&arp_frame(&request, MacAddr::BROADCAST), "eth1");

    let out = lab.sent();
    assert_eq!(out.len(), 2);
    assert_eq!(arp_of(&out[0].frame).operation, ArpOp::Reply);
    assert_eq!(Frame::parse(&out[1].frame).unwrap().dst_mac(), SERVER_MAC);
}

#[test]
fn spoofed_reply_ignored() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");
    lab.receive(&udp_from_host(SERVER_IP, 64), "eth0");
    lab.sent();

    let bogus = ArpPacket::reply(SERVER_MAC, SERVER_IP, MacAddr([0x0a, 9, 9, 9, 9, 9]), ETH1_IP);
    lab.receive(&arp_frame(&bogus, ETH1_MAC), "eth1");

    assert!(lab.sent().is_empty());
    assert!(lab.router.arp_cache().lookup(SERVER_IP).is_none());
    assert_eq!(lab.router.arp_cache().pending().len(), 1);
}

#[test]
fn request_for_neighbor_on_same_segment_not_relayed() {
    let mut lab = Lab::new();
    let request = ArpPacket::request(HOST_MAC, HOST_IP, Ipv4Addr::new(10, 0, 1, 77));

    lab.receive(&arp_frame(&request, MacAddr::BROADCAST), "eth0");

    assert!(lab.sent().is_empty());
    assert!(lab.router.arp_cache().lookup(HOST_IP).is_none());
}

#[test]
fn request_for_remote_target_relayed_toward_it() {
    let mut lab = Lab::new();
    lab.resolve(SERVER_IP, SERVER_MAC, "eth1");
    let request = ArpPacket::request(HOST_MAC, HOST_IP, SERVER_IP);
    let frame = arp_frame(&request, MacAddr::BROADCAST);

    lab.receive(&frame, "eth0");

    let out = lab.sent();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].interface, "eth1");
    let eth = Frame::parse(&out[0].frame).unwrap();
    assert_eq!(eth.src_mac(), ETH1_MAC);
    assert_eq!(eth.dst_mac(), SERVER_MAC);
    // ARP body is passed through untouched
    assert_eq!(eth.payload(), &frame[14..]);
}

#[test]
fn short_arp_dropped() {
    let mut lab = Lab::new();
    let frame = ether(MacAddr::BROADCAST, HOST_MAC, EtherType::Arp, &[0, 1, 8, 0, 6, 4]);

    lab.receive(&frame, "eth0");

    assert!(lab.sent().is_empty());
    assert_eq!(lab.metrics.get("eth0_rx_errors"), Some(1));
}

#[test]
fn dump_lists_resolved_neighbors() {
    let mut lab = Lab::new();
    lab.resolve(HOST_IP, HOST_MAC, "eth0");
    lab.resolve(SERVER_IP, SERVER_MAC, "eth1");

    let mut ips: Vec<Ipv4Addr> = lab.router.dump_arp_cache().iter().map(|e| e.ip).collect();
    ips.sort();
    assert_eq!(ips, vec![HOST_IP, SERVER_IP]);
    assert_eq!(lab.metrics.get("arp_table_size"), Some(2));
}
