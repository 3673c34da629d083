//! Link I/O
//!
//! The router core only ever sends through [`Transmit`]. Two backends:
//! - [`ChannelLink`]: hands frames to a tokio channel, drained by a task
//!   that owns the real sockets (also used to observe output in tests)
//! - [`AfPacketSocket`]: Linux raw socket bound to one interface

mod af_packet;
mod channel;

pub use af_packet::AfPacketSocket;
pub use channel::{ChannelLink, OutboundFrame};

use crate::Result;
use std::future::Future;

/// Fire-and-forget frame transmission on a named interface
pub trait Transmit: Send + Sync {
    fn transmit(&self, frame: &[u8], interface: &str) -> Result<()>;
}

/// Information about a received frame
#[derive(Debug, Clone)]
pub struct RxInfo {
    /// Number of bytes received
    pub len: usize,
}

/// Raw frame socket bound to a single interface
pub trait Capture: Send + Sync {
    /// Receive a frame into the provided buffer
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;

    /// Send a frame
    fn send(&self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
