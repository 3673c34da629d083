//! Channel-backed transmitter

use super::Transmit;
use crate::{Error, Result};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A frame on its way out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub interface: String,
    pub frame: Vec<u8>,
}

/// Queues outgoing frames on an unbounded channel.
///
/// Sending never blocks, so it is safe to call from the synchronous
/// packet path and from the sweeper.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: UnboundedSender<OutboundFrame>,
}

impl ChannelLink {
    pub fn new() -> (Self, UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transmit for ChannelLink {
    fn transmit(&self, frame: &[u8], interface: &str) -> Result<()> {
        self.tx
            .send(OutboundFrame {
                interface: interface.to_string(),
                frame: frame.to_vec(),
            })
            .map_err(|_| Error::LinkClosed(interface.to_string()))
    }
}
