//! Two-interface test router driven through its public API.
//!
//! Topology:
//!   10.0.1.0/24 -- eth0 (10.0.1.1) -- router -- eth1 (10.0.2.1) -- 10.0.2.0/24
//!   192.168.5.0/24 via 10.0.2.253, everything else via 10.0.2.254

#![allow(dead_code)]

use srouter::capture::{ChannelLink, OutboundFrame};
use srouter::dataplane::{
    Interface, InterfaceList, ManualClock, Route, Router, RouterConfig, RoutingTable,
};
use srouter::protocol::arp::ArpPacket;
use srouter::protocol::ethernet::{Frame, FrameBuilder};
use srouter::protocol::ipv4::{checksum, Ipv4Builder, Protocol};
use srouter::protocol::{EtherType, MacAddr};
use srouter::telemetry::MetricsRegistry;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const ETH0_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
pub const ETH1_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
pub const ETH0_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
pub const ETH1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 1);

pub const HOST_MAC: MacAddr = MacAddr([0x0a, 0, 0, 0, 1, 0x50]);
pub const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 50);
pub const GATEWAY_MAC: MacAddr = MacAddr([0x0a, 0, 0, 0, 2, 0xfe]);
pub const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 254);

pub fn interfaces() -> InterfaceList {
    vec![
        Interface::new("eth0", ETH0_MAC, ETH0_IP),
        Interface::new("eth1", ETH1_MAC, ETH1_IP),
    ]
    .into_iter()
    .collect()
}

fn connected_routes() -> Vec<Route> {
    vec![
        Route::new(
            Ipv4Addr::new(10, 0, 1, 0),
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::UNSPECIFIED,
            "eth0",
        ),
        Route::new(
            Ipv4Addr::new(10, 0, 2, 0),
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::UNSPECIFIED,
            "eth1",
        ),
    ]
}

pub fn routes() -> RoutingTable {
    let mut routes = connected_routes();
    routes.push(Route::new(
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        GATEWAY_IP,
        "eth1",
    ));
    routes.push(Route::new(
        Ipv4Addr::new(192, 168, 5, 0),
        Ipv4Addr::new(255, 255, 255, 0),
        Ipv4Addr::new(10, 0, 2, 253),
        "eth1",
    ));
    routes.into_iter().collect()
}

/// Only the connected networks, no default route
pub fn connected_only() -> RoutingTable {
    connected_routes().into_iter().collect()
}

pub struct Lab {
    pub router: Arc<Router>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<MetricsRegistry>,
    rx: UnboundedReceiver<OutboundFrame>,
}

impl Lab {
    pub fn new() -> Self {
        Self::build(routes(), RouterConfig::default())
    }

    pub fn build(routes: RoutingTable, config: RouterConfig) -> Self {
        let (link, rx) = ChannelLink::new();
        let clock = Arc::new(ManualClock::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let router = Router::new(
            interfaces(),
            routes,
            Arc::new(link),
            clock.clone(),
            config,
            metrics.clone(),
        );

        Self {
            router: Arc::new(router),
            clock,
            metrics,
            rx,
        }
    }

    /// Frames transmitted since the last call
    pub fn sent(&mut self) -> Vec<OutboundFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(frame);
        }
        out
    }

    pub fn receive(&self, frame: &[u8], interface: &str) {
        self.router.handle_frame(frame, interface);
    }

    /// Deliver an ARP reply from `ip`/`mac` on `interface` and discard
    /// anything it releases.
    pub fn resolve(&mut self, ip: Ipv4Addr, mac: MacAddr, interface: &str) {
        let (our_mac, our_ip) = match interface {
            "eth0" => (ETH0_MAC, ETH0_IP),
            _ => (ETH1_MAC, ETH1_IP),
        };
        let reply = ArpPacket::reply(mac, ip, our_mac, our_ip);
        self.receive(&arp_frame(&reply, our_mac), interface);
    }

    /// Advance simulated time and run one sweeper tick
    pub fn tick(&self, by: Duration) {
        self.clock.advance(by);
        self.router.sweep_arp_cache();
    }
}

pub fn ether(dst: MacAddr, src: MacAddr, ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(dst)
        .src_mac(src)
        .ethertype(ethertype as u16)
        .payload(payload)
        .build()
}

pub fn arp_frame(arp: &ArpPacket, dst: MacAddr) -> Vec<u8> {
    ether(dst, arp.sender_mac, EtherType::Arp, &arp.to_bytes())
}

pub fn datagram(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, protocol: Protocol, payload: &[u8]) -> Vec<u8> {
    Ipv4Builder::new()
        .identification(0x1234)
        .ttl(ttl)
        .protocol(protocol as u8)
        .src_addr(src)
        .dst_addr(dst)
        .payload(payload)
        .build()
}

/// UDP datagram from the eth0 host, framed toward eth0
pub fn udp_from_host(dst: Ipv4Addr, ttl: u8) -> Vec<u8> {
    let ip = datagram(HOST_IP, dst, ttl, Protocol::Udp, &[0x55; 24]);
    ether(ETH0_MAC, HOST_MAC, EtherType::Ipv4, &ip)
}

/// ICMP echo request body with a valid checksum
pub fn echo_request(id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut icmp = vec![8, 0, 0, 0];
    icmp.extend_from_slice(&id.to_be_bytes());
    icmp.extend_from_slice(&seq.to_be_bytes());
    icmp.extend_from_slice(data);
    let sum = checksum(&icmp);
    icmp[2..4].copy_from_slice(&sum.to_be_bytes());
    icmp
}

/// The IPv4 datagram carried by an outbound frame
pub fn ip_bytes(frame: &[u8]) -> Vec<u8> {
    let eth = Frame::parse(frame).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Ipv4 as u16);
    eth.payload().to_vec()
}
