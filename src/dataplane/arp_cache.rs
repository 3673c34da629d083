//! ARP cache and pending request queue
//!
//! A fixed number of IP to MAC slots plus one pending request per
//! unresolved IP. Frames waiting on a request are owned by it until the
//! address resolves (they are handed back for transmission) or the
//! request gives up (they are handed back for ICMP host unreachable).
//!
//! Everything lives behind one mutex. Nothing here calls back into the
//! router: `insert` and `sweep` return the work they uncover and the
//! caller acts on it after the lock is released.

use super::clock::Clock;
use crate::protocol::MacAddr;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default number of cache slots
pub const DEFAULT_CAPACITY: usize = 100;

/// Default lifetime of a resolved entry
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(15);

/// Default spacing between ARP requests for the same IP
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of ARP requests sent before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Tunables for the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpCacheConfig {
    pub capacity: usize,
    pub entry_ttl: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ArpCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            entry_ttl: DEFAULT_ENTRY_TTL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// One cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub valid: bool,
    /// When the mapping was installed or last refreshed
    pub added: Instant,
}

/// A frame waiting for its next hop to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    /// Complete Ethernet frame; link addresses are filled in at send time
    pub frame: Vec<u8>,
    /// Interface the frame leaves on
    pub interface: String,
}

/// Outstanding ARP request and the frames parked on it
#[derive(Debug, Clone)]
pub struct ArpRequest {
    pub ip: Ipv4Addr,
    /// ARP requests broadcast so far
    pub times_sent: u32,
    /// When the last ARP request went out
    pub sent: Instant,
    /// Interface the ARP requests are broadcast on
    pub interface: String,
    pub packets: Vec<QueuedPacket>,
    id: u64,
}

/// Identifies a pending request returned by `queue_request`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandle {
    pub ip: Ipv4Addr,
    /// True when this call created the request. The caller must then
    /// broadcast the first ARP request; the attempt is already counted.
    pub first_attempt: bool,
    id: u64,
}

/// Work uncovered by a sweep, to be carried out without the cache lock
#[derive(Debug)]
pub enum SweepAction {
    /// A mapping outlived its TTL and was invalidated
    Expired(ArpEntry),
    /// The request ran out of attempts; every queued frame's source gets
    /// an ICMP host unreachable
    Exhausted(ArpRequest),
    /// The address resolved without `insert` claiming the request
    Resolved { request: ArpRequest, mac: MacAddr },
    /// Broadcast another ARP request for `ip` on `interface`
    Resend { ip: Ipv4Addr, interface: String },
}

#[derive(Debug)]
struct CacheState {
    entries: Vec<ArpEntry>,
    requests: Vec<ArpRequest>,
    next_id: u64,
}

impl CacheState {
    fn find_valid(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.entries.iter().find(|e| e.valid && e.ip == ip)
    }
}

/// Thread-safe ARP cache
pub struct ArpCache {
    state: Mutex<CacheState>,
    config: ArpCacheConfig,
    clock: Arc<dyn Clock>,
}

impl ArpCache {
    pub fn new(config: ArpCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let empty = ArpEntry {
            ip: Ipv4Addr::UNSPECIFIED,
            mac: MacAddr::ZERO,
            valid: false,
            added: now,
        };

        Self {
            state: Mutex::new(CacheState {
                entries: vec![empty; config.capacity],
                requests: Vec::new(),
                next_id: 0,
            }),
            config,
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // The state is consistent between statements, so a panic elsewhere
        // while holding the lock leaves nothing half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ArpCacheConfig {
        &self.config
    }

    /// Copy of the valid mapping for `ip`, if any
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<ArpEntry> {
        self.state().find_valid(ip).copied()
    }

    /// Install or refresh `ip -> mac`.
    ///
    /// Atomically removes and returns the pending request for `ip` so the
    /// caller can transmit its queued frames. When every slot holds a valid
    /// mapping the oldest one is evicted.
    pub fn insert(&self, mac: MacAddr, ip: Ipv4Addr) -> Option<ArpRequest> {
        let now = self.clock.now();
        let mut state = self.state();

        let existing = state.entries.iter().position(|e| e.valid && e.ip == ip);
        let slot = existing
            .or_else(|| state.entries.iter().position(|e| !e.valid))
            .or_else(|| {
                state
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.added)
                    .map(|(i, _)| i)
            });

        match slot {
            Some(i) => {
                let entry = &mut state.entries[i];
                if existing.is_none() && entry.valid {
                    debug!("ARP cache full, evicting {} ({})", entry.ip, entry.mac);
                }
                *entry = ArpEntry {
                    ip,
                    mac,
                    valid: true,
                    added: now,
                };
                trace!("ARP cache: {} is-at {}", ip, mac);
            }
            None => debug!("ARP cache has no slots, not caching {}", ip),
        }

        let pos = state.requests.iter().position(|r| r.ip == ip)?;
        Some(state.requests.remove(pos))
    }

    /// Park a copy of `frame` until `ip` resolves.
    ///
    /// Creates the request for `ip` if none exists; creating it counts the
    /// first ARP request as sent, see `RequestHandle::first_attempt`.
    pub fn queue_request(&self, ip: Ipv4Addr, frame: &[u8], interface: &str) -> RequestHandle {
        let now = self.clock.now();
        let mut state = self.state();

        let packet = QueuedPacket {
            frame: frame.to_vec(),
            interface: interface.to_string(),
        };

        if let Some(req) = state.requests.iter_mut().find(|r| r.ip == ip) {
            req.packets.push(packet);
            return RequestHandle {
                ip,
                first_attempt: false,
                id: req.id,
            };
        }

        let id = state.next_id;
        state.next_id += 1;
        state.requests.push(ArpRequest {
            ip,
            times_sent: 1,
            sent: now,
            interface: interface.to_string(),
            packets: vec![packet],
            id,
        });

        RequestHandle {
            ip,
            first_attempt: true,
            id,
        }
    }

    /// Remove the request behind `handle` and release its frames.
    ///
    /// Returns false if the request was already gone.
    pub fn destroy_request(&self, handle: &RequestHandle) -> bool {
        let mut state = self.state();
        match state.requests.iter().position(|r| r.id == handle.id) {
            Some(pos) => {
                state.requests.remove(pos);
                true
            }
            None => false,
        }
    }

    /// One sweeper tick: expire old mappings and drive pending requests.
    pub fn sweep(&self) -> Vec<SweepAction> {
        let now = self.clock.now();
        let mut state = self.state();
        let mut actions = Vec::new();

        for entry in state.entries.iter_mut() {
            if entry.valid && now.saturating_duration_since(entry.added) >= self.config.entry_ttl {
                entry.valid = false;
                actions.push(SweepAction::Expired(*entry));
            }
        }

        let requests = std::mem::take(&mut state.requests);
        let mut keep = Vec::with_capacity(requests.len());

        for mut req in requests {
            if now.saturating_duration_since(req.sent) < self.config.retry_interval {
                keep.push(req);
                continue;
            }

            if req.times_sent >= self.config.max_attempts {
                actions.push(SweepAction::Exhausted(req));
            } else if let Some(mac) = state.find_valid(req.ip).map(|e| e.mac) {
                actions.push(SweepAction::Resolved { request: req, mac });
            } else {
                req.times_sent += 1;
                req.sent = now;
                actions.push(SweepAction::Resend {
                    ip: req.ip,
                    interface: req.interface.clone(),
                });
                keep.push(req);
            }
        }

        state.requests = keep;
        actions
    }

    /// Snapshot of the valid mappings
    pub fn entries(&self) -> Vec<ArpEntry> {
        self.state().entries.iter().filter(|e| e.valid).copied().collect()
    }

    /// Snapshot of the pending requests
    pub fn pending(&self) -> Vec<ArpRequest> {
        self.state().requests.clone()
    }

    /// Number of valid mappings
    pub fn len(&self) -> usize {
        self.state().entries.iter().filter(|e| e.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ArpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArpCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}
