//! Data plane components
//!
//! Handles packet processing: parsing, forwarding decisions, ARP
//! resolution and transmission.

mod arp_cache;
mod clock;
mod generators;
mod interface;
mod router;
mod routing;

pub use arp_cache::{
    ArpCache, ArpCacheConfig, ArpEntry, ArpRequest, QueuedPacket, RequestHandle, SweepAction,
    DEFAULT_CAPACITY, DEFAULT_ENTRY_TTL, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use generators::{make_arp, make_icmp, IcmpMessage};
pub use interface::{Interface, InterfaceList};
pub use router::{Router, RouterConfig, DEFAULT_HOP_COST, DEFAULT_SWEEP_INTERVAL};
pub use routing::{Route, RoutingTable};
