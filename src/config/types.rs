//! Configuration types

use crate::dataplane::{
    ArpCacheConfig, Interface, InterfaceList, Route, RouterConfig, RoutingTable,
    DEFAULT_CAPACITY, DEFAULT_HOP_COST, DEFAULT_MAX_ATTEMPTS,
};
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Router configuration (config.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub arp: ArpSection,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// TTL decrement per forwarded packet
    pub hop_cost: u8,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            hop_cost: DEFAULT_HOP_COST,
        }
    }
}

/// `[arp]` section; intervals are in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArpSection {
    pub capacity: usize,
    pub entry_ttl: u64,
    pub retry_interval: u64,
    pub max_attempts: u32,
    pub sweep_interval: u64,
}

impl Default for ArpSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            entry_ttl: 15,
            retry_interval: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sweep_interval: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub mac: String,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// 0.0.0.0 for a directly connected network
    #[serde(default = "unspecified")]
    pub gateway: Ipv4Addr,
    pub interface: String,
}

fn unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Config {
    /// Runtime tunables for the router core
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            arp: ArpCacheConfig {
                capacity: self.arp.capacity,
                entry_ttl: Duration::from_secs(self.arp.entry_ttl),
                retry_interval: Duration::from_secs(self.arp.retry_interval),
                max_attempts: self.arp.max_attempts,
            },
            hop_cost: self.router.hop_cost,
            sweep_interval: Duration::from_secs(self.arp.sweep_interval),
        }
    }

    /// Interfaces in file order. Fails on an unparsable MAC.
    pub fn interface_list(&self) -> Result<InterfaceList> {
        self.interfaces
            .iter()
            .map(|iface| {
                let mac: MacAddr = iface.mac.parse().map_err(|e| {
                    Error::Config(format!("interfaces.{}: {}", iface.name, e))
                })?;
                Ok(Interface::new(iface.name.clone(), mac, iface.ip))
            })
            .collect()
    }

    /// Routing table in file order
    pub fn routing_table(&self) -> RoutingTable {
        self.routes
            .iter()
            .map(|r| Route::new(r.destination, r.mask, r.gateway, r.interface.clone()))
            .collect()
    }
}
