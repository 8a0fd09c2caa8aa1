//! Link establishment.
//!
//! A [`Transport`] opens one authenticated link per call and hands back a
//! [`TransportLink`]: an outbound frame sender, an inbound event receiver,
//! and the server-assigned connection id when one was provided. Dropping the
//! outbound sender closes the link.
//!
//! [`WebSocketTransport`] is the production implementation;
//! [`MemoryTransport`] drives the same state machine in tests without a
//! network.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use relay_core::{ConnectionId, Frame};
use tokio::sync::mpsc;

use crate::credential::Credential;

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;

/// Everything needed to open one link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRequest {
    /// `ws://` or `wss://` address.
    pub endpoint: String,
    /// Credential sent in the first frame.
    pub credential: Credential,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
}

/// Something that happened on an open link.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// A decoded inbound frame.
    Frame(Frame),
    /// The link is gone. No further events follow.
    Closed(String),
}

/// An open, authenticated link.
#[derive(Debug)]
pub struct TransportLink {
    /// Server-assigned connection id, if any.
    pub id: Option<ConnectionId>,
    /// Frames queued here are written to the link in order.
    pub outbound: mpsc::Sender<Frame>,
    /// Inbound frames followed by exactly one [`LinkEvent::Closed`].
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens links to the realtime server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open and authenticate one link.
    async fn open(&self, request: &LinkRequest) -> relay_core::Result<TransportLink>;
}
