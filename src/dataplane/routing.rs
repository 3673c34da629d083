//! Static routing table with longest prefix match

use std::fmt;
use std::net::Ipv4Addr;

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: Ipv4Addr,
    /// Subnet mask
    pub mask: Ipv4Addr,
    /// Gateway (0.0.0.0 for a directly connected network)
    pub gateway: Ipv4Addr,
    /// Outgoing interface name
    pub interface: String,
}

impl Route {
    pub fn new(
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            mask,
            gateway,
            interface: interface.into(),
        }
    }

    /// Whether `addr` falls inside this route's network
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        (mask & u32::from(self.destination)) == (mask & u32::from(addr))
    }

    /// Address to resolve on the link when sending to `dst` over this route
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            dst
        } else {
            self.gateway
        }
    }

    /// Number of leading one bits in the mask
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} via {} dev {}",
            self.destination,
            self.prefix_len(),
            self.gateway,
            self.interface
        )
    }
}

/// Routing table, kept in load order
#[derive(Debug, Default, Clone)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Append a route; earlier routes win ties on equal masks
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Lookup using longest prefix match.
    ///
    /// Among matching routes the numerically greatest mask wins; on equal
    /// masks the route loaded first wins.
    pub fn longest_prefix_match(&self, addr: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<&Route> = None;

        for route in self.routes.iter().filter(|r| r.matches(addr)) {
            match best {
                Some(b) if u32::from(b.mask) >= u32::from(route.mask) => {}
                _ => best = Some(route),
            }
        }

        best
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<Route> for RoutingTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}
