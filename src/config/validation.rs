//! Configuration validation

use super::Config;
use crate::protocol::MacAddr;
use crate::telemetry::is_known_level;
use std::collections::HashSet;
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_router(config, &mut result);
    validate_arp(config, &mut result);
    validate_logging(config, &mut result);
    validate_interfaces(config, &mut result);
    validate_routes(config, &mut result);

    result
}

fn is_contiguous(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    bits.leading_ones() + bits.trailing_zeros() == 32
}

fn validate_router(config: &Config, result: &mut ValidationResult) {
    if config.router.hop_cost == 0 {
        result.error("router.hop_cost: must be at least 1");
    }
}

fn validate_arp(config: &Config, result: &mut ValidationResult) {
    let arp = &config.arp;

    if arp.capacity == 0 {
        result.error("arp.capacity: must be at least 1");
    }
    if arp.max_attempts == 0 {
        result.error("arp.max_attempts: must be at least 1");
    }
    if arp.retry_interval == 0 {
        result.error("arp.retry_interval: must be at least 1 second");
    }
    if arp.sweep_interval == 0 {
        result.error("arp.sweep_interval: must be at least 1 second");
    }
    if arp.entry_ttl == 0 {
        result.warn("arp.entry_ttl: 0 expires every entry on the next sweep");
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.logging.level) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }
}

fn validate_interfaces(config: &Config, result: &mut ValidationResult) {
    if config.interfaces.is_empty() {
        result.error("interfaces: at least one interface is required");
    }

    let mut names = HashSet::new();
    let mut addresses = HashSet::new();

    for iface in &config.interfaces {
        if !names.insert(iface.name.as_str()) {
            result.error(format!("interfaces.{}: duplicate name", iface.name));
        }

        if !addresses.insert(iface.ip) {
            result.error(format!(
                "interfaces.{}: address {} already assigned",
                iface.name, iface.ip
            ));
        }

        if iface.ip.is_unspecified() || iface.ip.is_broadcast() || iface.ip.is_multicast() {
            result.error(format!(
                "interfaces.{}: {} is not a usable host address",
                iface.name, iface.ip
            ));
        }

        match iface.mac.parse::<MacAddr>() {
            Ok(mac) if mac.is_multicast() || mac.is_zero() => {
                result.error(format!(
                    "interfaces.{}: {} is not a unicast MAC address",
                    iface.name, mac
                ));
            }
            Ok(_) => {}
            Err(e) => result.error(format!("interfaces.{}: {}", iface.name, e)),
        }
    }
}

fn validate_routes(config: &Config, result: &mut ValidationResult) {
    if config.routes.is_empty() {
        result.warn("routes: no routes configured, nothing can be forwarded");
    }

    for route in &config.routes {
        let label = format!("routes.{}/{}", route.destination, route.mask);

        if !config.interfaces.iter().any(|i| i.name == route.interface) {
            result.error(format!(
                "{}: interface '{}' not defined",
                label, route.interface
            ));
        }

        if !is_contiguous(route.mask) {
            result.error(format!("{}: mask is not contiguous", label));
            continue;
        }

        let dest = u32::from(route.destination);
        if dest & !u32::from(route.mask) != 0 {
            result.warn(format!(
                "{}: destination has host bits set, they are ignored",
                label
            ));
        }
    }
}
