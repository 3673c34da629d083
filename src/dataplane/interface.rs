//! Router-owned interfaces

use crate::protocol::MacAddr;
use std::net::Ipv4Addr;

/// An interface the router sends and receives on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

impl Interface {
    pub fn new(name: impl Into<String>, mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            mac,
            ip,
        }
    }
}

/// Immutable set of interfaces, in load order
#[derive(Debug, Clone, Default)]
pub struct InterfaceList {
    interfaces: Vec<Interface>,
}

impl InterfaceList {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    /// Interface by name
    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Interface that owns `ip`, if the address is one of ours
    pub fn owning(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.ip == ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.interfaces.iter().map(|i| i.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl FromIterator<Interface> for InterfaceList {
    fn from_iter<I: IntoIterator<Item = Interface>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
