//! Wire formats handled by the router
//!
//! Ethernet II, ARP for Ethernet/IPv4, IPv4 and ICMP. Every parser is
//! bounds-checked and every multi-byte field is big-endian on the wire.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod types;

pub use types::*;
