//! Outbound queue and shared state for the btcd link.
//!
//! The transport (dialing, framing, reconnection) lives outside the core;
//! this is the handle the dispatch layer writes requests to and consults
//! for chain state the node owns. Enqueueing while the node is away is a
//! silent no-op: replies for dropped requests simply never arrive, and the
//! unmined pool covers rebroadcast after a reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::error::NodeError;
use crate::types::BlockStamp;

/// Handle to the node peer shared across the daemon.
#[derive(Debug)]
pub struct NodeLink {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    connected: AtomicBool,
    best_block: RwLock<Option<BlockStamp>>,
}

impl NodeLink {
    /// Create the link and the receiving end of its outbound queue. The
    /// node session task drains the receiver into the socket.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                connected: AtomicBool::new(false),
                best_block: RwLock::new(None),
            },
            rx,
        )
    }

    /// Queue a serialized request for the node. Dropped silently when the
    /// node is not connected.
    pub fn send(&self, msg: Vec<u8>) {
        if !self.is_connected() {
            tracing::debug!("dropping node-bound message: btcd disconnected");
            return;
        }
        let _ = self.outbound.send(msg);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// The node's current best block, for operations that need chain state
    /// synchronously.
    pub fn best_block(&self) -> Result<BlockStamp, NodeError> {
        if !self.is_connected() {
            return Err(NodeError::Disconnected);
        }
        self.best_block
            .read()
            .ok()
            .and_then(|guard| *guard)
            .ok_or(NodeError::Disconnected)
    }

    /// Best height for confirmation counting; zero while the chain state
    /// is unknown.
    pub fn best_height(&self) -> u32 {
        self.best_block().map(|bs| bs.height).unwrap_or(0)
    }

    pub fn set_best_block(&self, stamp: BlockStamp) {
        if let Ok(mut guard) = self.best_block.write() {
            *guard = Some(stamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_link_drops_messages() {
        let (node, mut rx) = NodeLink::new();
        node.send(b"lost".to_vec());
        assert!(rx.try_recv().is_err());

        node.set_connected(true);
        node.send(b"kept".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"kept".to_vec());
    }

    #[test]
    fn best_block_requires_connection() {
        let (node, _rx) = NodeLink::new();
        assert_eq!(node.best_block(), Err(NodeError::Disconnected));

        node.set_best_block(BlockStamp::at_height(42));
        assert_eq!(node.best_block(), Err(NodeError::Disconnected));

        node.set_connected(true);
        assert_eq!(node.best_block().unwrap().height, 42);
        assert_eq!(node.best_height(), 42);
    }
}
