//! Packet processing router
//!
//! Classifies inbound frames, answers ARP and ICMP for owned addresses,
//! forwards everything else by longest prefix match and parks frames whose
//! next hop is not resolved yet. The sweeper drives ARP retries and cache
//! expiry from a tokio task.

use super::arp_cache::{ArpCache, ArpCacheConfig, ArpEntry, ArpRequest, SweepAction};
use super::clock::Clock;
use super::generators::{make_arp, make_icmp};
use super::interface::InterfaceList;
use super::routing::RoutingTable;
use crate::capture::Transmit;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::ethernet::{rewrite_addresses, Frame, FrameBuilder};
use crate::protocol::icmp::{dest_unreachable, time_exceeded, IcmpPacket, IcmpType};
use crate::protocol::ipv4::{Ipv4Header, Ipv4Packet, Protocol};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::MetricsRegistry;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Default TTL decrement per forwarded packet
pub const DEFAULT_HOP_COST: u8 = 1;

/// Default sweeper period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Router tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    pub arp: ArpCacheConfig,
    /// Amount subtracted from the TTL of every forwarded packet
    pub hop_cost: u8,
    pub sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            arp: ArpCacheConfig::default(),
            hop_cost: DEFAULT_HOP_COST,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// The router core.
///
/// Shared between the receive tasks and the sweeper behind an `Arc`; the
/// only mutable state is the ARP cache, which carries its own lock.
pub struct Router {
    interfaces: InterfaceList,
    routes: RoutingTable,
    arp_cache: ArpCache,
    link: Arc<dyn Transmit>,
    metrics: Arc<MetricsRegistry>,
    hop_cost: u8,
    sweep_interval: Duration,
}

impl Router {
    pub fn new(
        interfaces: InterfaceList,
        routes: RoutingTable,
        link: Arc<dyn Transmit>,
        clock: Arc<dyn Clock>,
        config: RouterConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        for iface in interfaces.iter() {
            metrics.register_interface(&iface.name);
        }
        metrics.set_route_count(routes.len());

        Self {
            interfaces,
            routes,
            arp_cache: ArpCache::new(config.arp, clock),
            link,
            metrics,
            hop_cost: config.hop_cost,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Process one inbound frame received on `ingress`.
    ///
    /// Never fails: malformed or corrupted input is dropped with a
    /// diagnostic, everything else results in zero or more transmissions.
    pub fn handle_frame(&self, frame: &[u8], ingress: &str) {
        let Some(iface) = self.interfaces.get(ingress) else {
            warn!("Frame received on unknown interface {}", ingress);
            return;
        };
        self.metrics.record_rx(ingress, frame.len());

        let eth = match Frame::parse(frame) {
            Ok(f) => f,
            Err(e) => {
                warn!("Corrupt frame on {}: {}", ingress, e);
                self.metrics.record_rx_error(ingress);
                return;
            }
        };

        trace!(
            "{}: {} -> {} type 0x{:04x} len {}",
            ingress,
            eth.src_mac(),
            eth.dst_mac(),
            eth.ethertype(),
            frame.len()
        );

        // The socket is promiscuous; unicast for other stations is not ours to route
        let dst = eth.dst_mac();
        if dst != iface.mac && !dst.is_broadcast() {
            trace!("{}: frame for {} is not addressed to us", ingress, dst);
            return;
        }

        match EtherType::from_u16(eth.ethertype()) {
            Some(EtherType::Arp) => self.handle_arp(&eth, ingress),
            Some(EtherType::Ipv4) => self.handle_ip(&eth, ingress),
            None => {
                trace!("Ignoring EtherType 0x{:04x}", eth.ethertype());
                self.metrics.record_rx_drop(ingress);
            }
        }
    }

    fn handle_arp(&self, eth: &Frame<'_>, ingress: &str) {
        let arp = match ArpPacket::parse(eth.payload()) {
            Ok(a) => a,
            Err(e) => {
                warn!("Corrupt ARP packet on {}: {}", ingress, e);
                self.metrics.record_rx_error(ingress);
                return;
            }
        };

        let Some(owner) = self.interfaces.owning(arp.target_ip) else {
            self.relay_arp(eth, arp.target_ip, ingress);
            return;
        };

        match arp.operation {
            ArpOp::Reply => {
                if arp.target_mac != owner.mac {
                    warn!(
                        "ARP reply for {} names {} instead of {}, dropping",
                        arp.target_ip, arp.target_mac, owner.mac
                    );
                    self.metrics.record_rx_drop(ingress);
                    return;
                }
                debug!("ARP reply: {} is-at {}", arp.sender_ip, arp.sender_mac);
                self.learn(arp.sender_mac, arp.sender_ip);
            }
            ArpOp::Request => {
                debug!(
                    "ARP request from {} ({}) for {}",
                    arp.sender_ip, arp.sender_mac, arp.target_ip
                );
                let reply = make_arp(owner, arp.sender_mac, arp.sender_ip, ArpOp::Reply);
                if self.transmit(&reply, ingress) {
                    self.metrics.arp_replies_sent.inc();
                }
                self.learn(arp.sender_mac, arp.sender_ip);
            }
        }
    }

    /// ARP traffic for someone else is passed along toward its target.
    fn relay_arp(&self, eth: &Frame<'_>, target: Ipv4Addr, ingress: &str) {
        match self.routes.longest_prefix_match(target) {
            Some(route) if route.interface == ingress => {
                // The target shares the ingress segment and saw the frame already
                trace!("ARP for {} stays on {}", target, ingress);
            }
            Some(route) => {
                trace!("Relaying ARP for {} via {}", target, route.interface);
                self.forward(eth.as_bytes().to_vec(), route.next_hop(target), &route.interface);
            }
            None => {
                debug!("No route for ARP target {}, dropping", target);
                self.metrics.record_rx_drop(ingress);
            }
        }
    }

    /// Install a mapping and release anything that was waiting on it.
    fn learn(&self, mac: MacAddr, ip: Ipv4Addr) {
        if let Some(request) = self.arp_cache.insert(mac, ip) {
            self.send_resolved(request, mac);
        }
        self.metrics.set_arp_table_size(self.arp_cache.len());
    }

    fn send_resolved(&self, request: ArpRequest, mac: MacAddr) {
        debug!(
            "{} resolved, sending {} queued frames",
            request.ip,
            request.packets.len()
        );

        for packet in request.packets {
            let Some(iface) = self.interfaces.get(&packet.interface) else {
                warn!("Queued frame names unknown interface {}", packet.interface);
                continue;
            };
            let mut frame = packet.frame;
            if let Err(e) = rewrite_addresses(&mut frame, iface.mac, mac) {
                warn!("Dropping queued frame for {}: {}", request.ip, e);
                continue;
            }
            if self.transmit(&frame, &packet.interface) {
                self.metrics.arp_frames_replayed.inc();
            }
        }
    }

    fn handle_ip(&self, eth: &Frame<'_>, ingress: &str) {
        let header = match Ipv4Header::parse(eth.payload()) {
            Ok(h) => h,
            Err(e) => {
                warn!("Corrupt IPv4 packet on {}: {}", ingress, e);
                self.metrics.record_rx_error(ingress);
                return;
            }
        };

        if !header.validate_checksum() {
            trace!("Bad IPv4 checksum from {}", header.src_addr());
            self.metrics.checksum_errors.inc();
            self.metrics.record_rx_drop(ingress);
            return;
        }

        if self.interfaces.owning(header.dst_addr()).is_some() {
            self.deliver_local(&header, ingress);
        } else {
            self.route_ip(&header, ingress);
        }
    }

    fn deliver_local(&self, header: &Ipv4Header<'_>, ingress: &str) {
        match Protocol::from_u8(header.protocol()) {
            Some(Protocol::Icmp) => {
                let icmp = match IcmpPacket::parse(header.payload()) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Corrupt ICMP packet from {}: {}", header.src_addr(), e);
                        self.metrics.record_rx_error(ingress);
                        return;
                    }
                };
                if !icmp.validate_checksum() {
                    trace!("Bad ICMP checksum from {}", header.src_addr());
                    self.metrics.checksum_errors.inc();
                    self.metrics.record_rx_drop(ingress);
                    return;
                }
                if icmp.is_echo_request() {
                    self.send_icmp(header, IcmpType::EchoReply, 0);
                } else {
                    trace!(
                        "Ignoring ICMP type {} from {}",
                        icmp.icmp_type(),
                        header.src_addr()
                    );
                }
            }
            Some(Protocol::Tcp) | Some(Protocol::Udp) => {
                self.send_icmp(
                    header,
                    IcmpType::DestinationUnreachable,
                    dest_unreachable::PORT_UNREACHABLE,
                );
            }
            None => {
                debug!(
                    "No handler for IP protocol {} to {}",
                    header.protocol(),
                    header.dst_addr()
                );
                self.metrics.record_rx_drop(ingress);
            }
        }
    }

    fn route_ip(&self, header: &Ipv4Header<'_>, ingress: &str) {
        if header.ttl() <= self.hop_cost {
            debug!(
                "TTL expired for {} -> {}",
                header.src_addr(),
                header.dst_addr()
            );
            self.metrics.record_rx_drop(ingress);
            self.send_icmp(header, IcmpType::TimeExceeded, time_exceeded::TTL_EXCEEDED);
            return;
        }

        let Some(route) = self.routes.longest_prefix_match(header.dst_addr()) else {
            debug!("No route to {}", header.dst_addr());
            self.metrics.record_rx_drop(ingress);
            self.send_icmp(
                header,
                IcmpType::DestinationUnreachable,
                dest_unreachable::NET_UNREACHABLE,
            );
            return;
        };

        let mut packet = match Ipv4Packet::from_bytes(header.as_bytes()) {
            Ok(p) => p,
            Err(e) => {
                warn!("Cannot forward packet to {}: {}", header.dst_addr(), e);
                self.metrics.record_rx_error(ingress);
                return;
            }
        };
        packet.decrement_ttl(self.hop_cost);

        let frame = FrameBuilder::new()
            .dst_mac(MacAddr::ZERO)
            .src_mac(MacAddr::ZERO)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(packet.as_bytes())
            .build();

        trace!(
            "Forwarding {} -> {} via {}",
            header.src_addr(),
            header.dst_addr(),
            route
        );
        self.forward(frame, route.next_hop(header.dst_addr()), &route.interface);
        self.metrics.packets_forwarded.inc();
    }

    fn send_icmp(&self, original: &Ipv4Header<'_>, icmp_type: IcmpType, code: u8) {
        let Some(msg) = make_icmp(&self.interfaces, &self.routes, original, icmp_type, code) else {
            return;
        };

        match icmp_type {
            IcmpType::EchoReply => self.metrics.icmp_echo_replies.inc(),
            IcmpType::DestinationUnreachable => self.metrics.icmp_dest_unreachable.inc(),
            IcmpType::TimeExceeded => self.metrics.icmp_time_exceeded.inc(),
            _ => {}
        }

        self.forward(msg.frame, msg.next_hop, &msg.interface);
    }

    /// Send `frame` to `next_hop` out of `interface`.
    ///
    /// The link addresses are filled in from the ARP cache. On a miss the
    /// frame is parked on the pending request for `next_hop`, and the first
    /// ARP request goes out if this call created it.
    pub fn forward(&self, mut frame: Vec<u8>, next_hop: Ipv4Addr, interface: &str) {
        let Some(iface) = self.interfaces.get(interface) else {
            warn!("Cannot forward on unknown interface {}", interface);
            return;
        };

        if let Some(entry) = self.arp_cache.lookup(next_hop) {
            if let Err(e) = rewrite_addresses(&mut frame, iface.mac, entry.mac) {
                warn!("Dropping frame for {}: {}", next_hop, e);
                return;
            }
            self.transmit(&frame, interface);
            return;
        }

        let handle = self.arp_cache.queue_request(next_hop, &frame, interface);
        self.metrics.arp_frames_queued.inc();
        trace!("Queued frame for {} on {}", next_hop, interface);

        if handle.first_attempt {
            self.send_arp_request(next_hop, interface);
        }
    }

    fn send_arp_request(&self, ip: Ipv4Addr, interface: &str) {
        let Some(iface) = self.interfaces.get(interface) else {
            warn!("Cannot send ARP request on unknown interface {}", interface);
            return;
        };

        trace!("ARP who-has {} tell {} on {}", ip, iface.ip, interface);
        let request = make_arp(iface, MacAddr::ZERO, ip, ArpOp::Request);
        if self.transmit(&request, interface) {
            self.metrics.arp_requests_sent.inc();
        }
    }

    fn transmit(&self, frame: &[u8], interface: &str) -> bool {
        match self.link.transmit(frame, interface) {
            Ok(()) => {
                self.metrics.record_tx(interface, frame.len());
                true
            }
            Err(e) => {
                warn!("Failed to send on {}: {}", interface, e);
                self.metrics.record_tx_error(interface);
                false
            }
        }
    }

    /// One sweeper tick: expire stale mappings, retry or give up on
    /// pending requests.
    pub fn sweep_arp_cache(&self) {
        for action in self.arp_cache.sweep() {
            match action {
                SweepAction::Expired(entry) => {
                    debug!("ARP entry {} ({}) expired", entry.ip, entry.mac);
                    self.metrics.arp_entries_expired.inc();
                }
                SweepAction::Exhausted(request) => self.report_unresolved(request),
                SweepAction::Resolved { request, mac } => self.send_resolved(request, mac),
                SweepAction::Resend { ip, interface } => self.send_arp_request(ip, &interface),
            }
        }
        self.metrics.set_arp_table_size(self.arp_cache.len());
    }

    fn report_unresolved(&self, request: ArpRequest) {
        warn!(
            "No ARP reply from {} after {} requests, dropping {} frames",
            request.ip,
            request.times_sent,
            request.packets.len()
        );
        self.metrics.arp_resolution_failures.inc();

        for packet in &request.packets {
            let Ok(eth) = Frame::parse(&packet.frame) else {
                continue;
            };
            if eth.ethertype() != EtherType::Ipv4 as u16 {
                continue;
            }
            if let Ok(header) = Ipv4Header::parse(eth.payload()) {
                self.send_icmp(
                    &header,
                    IcmpType::DestinationUnreachable,
                    dest_unreachable::HOST_UNREACHABLE,
                );
            }
        }
    }

    /// Run `sweep_arp_cache` every sweep interval until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                router.sweep_arp_cache();
            }
        })
    }

    /// Log the resolved mappings and return them.
    pub fn dump_arp_cache(&self) -> Vec<ArpEntry> {
        let entries = self.arp_cache.entries();
        info!("ARP cache: {} entries", entries.len());
        for entry in &entries {
            info!("  {:<15} {}", entry.ip.to_string(), entry.mac);
        }
        entries
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp_cache
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn interfaces(&self) -> &InterfaceList {
        &self.interfaces
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}
