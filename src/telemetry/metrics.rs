//! Packet and ARP counters.
//!
//! Relaxed atomics, global and per interface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traffic seen on one router interface
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    /// Frames accepted but not acted on (bad checksum, no route, TTL)
    pub rx_drops: Counter,
    /// Frames too short or malformed to classify
    pub rx_errors: Counter,
    /// Frames the link refused
    pub tx_errors: Counter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }

    pub fn record_rx_error(&self) {
        self.rx_errors.inc();
    }

    pub fn record_tx_error(&self) {
        self.tx_errors.inc();
    }

    pub fn record_rx_drop(&self) {
        self.rx_drops.inc();
    }
}

/// Global metrics registry for the router.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Per-interface statistics.
    interfaces: RwLock<HashMap<String, InterfaceStats>>,

    // ARP metrics
    /// Number of ARP requests sent.
    pub arp_requests_sent: Counter,
    /// Number of ARP replies sent.
    pub arp_replies_sent: Counter,
    /// Number of frames parked waiting for ARP resolution.
    pub arp_frames_queued: Counter,
    /// Number of parked frames sent after their next hop resolved.
    pub arp_frames_replayed: Counter,
    /// Number of requests abandoned after the last retry.
    pub arp_resolution_failures: Counter,
    /// Number of cache entries invalidated by age.
    pub arp_entries_expired: Counter,

    // Forwarding metrics
    /// Number of packets routed toward a next hop.
    pub packets_forwarded: Counter,
    /// Number of packets dropped (malformed, no route, TTL expired, etc.).
    pub packets_dropped: Counter,
    /// Number of packets dropped for a bad IPv4 or ICMP checksum.
    pub checksum_errors: Counter,

    // ICMP metrics
    /// Number of ICMP echo replies sent.
    pub icmp_echo_replies: Counter,
    /// Number of ICMP destination unreachable messages sent.
    pub icmp_dest_unreachable: Counter,
    /// Number of ICMP time exceeded messages sent.
    pub icmp_time_exceeded: Counter,

    // Table size gauges (using AtomicU64 for gauges)
    /// Current number of valid ARP cache entries.
    pub arp_table_size: AtomicU64,
    /// Current number of routing table entries.
    pub route_count: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_interface(&self, interface: &str, f: impl FnOnce(&InterfaceStats)) {
        let interfaces = self.interfaces.read().unwrap_or_else(|e| e.into_inner());
        if let Some(stats) = interfaces.get(interface) {
            f(stats);
        }
    }

    /// Registers an interface for statistics tracking.
    pub fn register_interface(&self, name: &str) {
        let mut interfaces = self.interfaces.write().unwrap_or_else(|e| e.into_inner());
        interfaces.entry(name.to_string()).or_default();
    }

    /// Records a received packet on an interface.
    pub fn record_rx(&self, interface: &str, bytes: usize) {
        self.with_interface(interface, |s| s.record_rx(bytes));
    }

    /// Records a transmitted packet on an interface.
    pub fn record_tx(&self, interface: &str, bytes: usize) {
        self.with_interface(interface, |s| s.record_tx(bytes));
    }

    /// Records a receive error on an interface.
    pub fn record_rx_error(&self, interface: &str) {
        self.with_interface(interface, InterfaceStats::record_rx_error);
    }

    /// Records a transmit error on an interface.
    pub fn record_tx_error(&self, interface: &str) {
        self.with_interface(interface, InterfaceStats::record_tx_error);
    }

    /// Records a packet dropped after it was received on an interface.
    pub fn record_rx_drop(&self, interface: &str) {
        self.packets_dropped.inc();
        self.with_interface(interface, InterfaceStats::record_rx_drop);
    }

    /// Updates the ARP table size gauge.
    pub fn set_arp_table_size(&self, size: usize) {
        self.arp_table_size.store(size as u64, Ordering::Relaxed);
    }

    /// Updates the route count gauge.
    pub fn set_route_count(&self, count: usize) {
        self.route_count.store(count as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("arp_requests_sent".into(), self.arp_requests_sent.get()),
            ("arp_replies_sent".into(), self.arp_replies_sent.get()),
            ("arp_frames_queued".into(), self.arp_frames_queued.get()),
            ("arp_frames_replayed".into(), self.arp_frames_replayed.get()),
            (
                "arp_resolution_failures".into(),
                self.arp_resolution_failures.get(),
            ),
            ("arp_entries_expired".into(), self.arp_entries_expired.get()),
            ("packets_forwarded".into(), self.packets_forwarded.get()),
            ("packets_dropped".into(), self.packets_dropped.get()),
            ("checksum_errors".into(), self.checksum_errors.get()),
            ("icmp_echo_replies".into(), self.icmp_echo_replies.get()),
            (
                "icmp_dest_unreachable".into(),
                self.icmp_dest_unreachable.get(),
            ),
            ("icmp_time_exceeded".into(), self.icmp_time_exceeded.get()),
            (
                "arp_table_size".into(),
                self.arp_table_size.load(Ordering::Relaxed),
            ),
            (
                "route_count".into(),
                self.route_count.load(Ordering::Relaxed),
            ),
        ];

        // Per-interface metrics
        let interfaces = self.interfaces.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&String> = interfaces.keys().collect();
        names.sort();
        for name in names {
            let stats = &interfaces[name];
            result.extend([
                (format!("{}_rx_packets", name), stats.rx_packets.get()),
                (format!("{}_rx_bytes", name), stats.rx_bytes.get()),
                (format!("{}_tx_packets", name), stats.tx_packets.get()),
                (format!("{}_tx_bytes", name), stats.tx_bytes.get()),
                (format!("{}_rx_drops", name), stats.rx_drops.get()),
                (format!("{}_rx_errors", name), stats.rx_errors.get()),
                (format!("{}_tx_errors", name), stats.tx_errors.get()),
            ]);
        }

        result
    }

    /// Looks up a single exported metric by name.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.export()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}
