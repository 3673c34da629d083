//! srouter - static software IPv4 router
//!
//! Receives raw Ethernet frames on named interfaces, resolves next hops
//! through an ARP cache with a pending-request queue, routes by longest
//! prefix match and answers with ICMP where the router has to.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
