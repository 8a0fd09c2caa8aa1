//! In-process transport for tests and embedding.
//!
//! Every accepted [`MemoryTransport::open`] hands a [`MemoryPeer`] to the
//! receiver returned from [`MemoryTransport::new`]. The peer plays the
//! server: it can push events, read frames the client emitted, and close
//! the link. Outcomes of successive opens can be scripted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{ConnectionId, Frame, RelayError};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{LinkEvent, LinkRequest, Transport, TransportLink};

/// Result of one scripted open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Open succeeds and a peer is handed out.
    Accept,
    /// Open fails with a retryable connect error.
    Refuse,
}

/// Scriptable in-memory [`Transport`].
#[derive(Debug)]
pub struct MemoryTransport {
    script: Mutex<VecDeque<Outcome>>,
    refuse_all: AtomicBool,
    attempts: AtomicUsize,
    requests: Mutex<Vec<LinkRequest>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a transport that accepts every open, and the receiver that
    /// yields a peer per accepted link.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            script: Mutex::new(VecDeque::new()),
            refuse_all: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            peers,
        };
        (transport, rx)
    }

    /// Queue outcomes for the next opens. Once the script runs out the
    /// default applies.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Make unscripted opens fail (`true`) or succeed (`false`).
    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Number of opens attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<LinkRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, request: &LinkRequest) -> relay_core::Result<TransportLink> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let outcome = self.script.lock().pop_front().unwrap_or_else(|| {
            if self.refuse_all.load(Ordering::SeqCst) {
                Outcome::Refuse
            } else {
                Outcome::Accept
            }
        });
        if outcome == Outcome::Refuse {
            return Err(RelayError::Connect {
                endpoint: request.endpoint.clone(),
                message: "refused".into(),
            });
        }

        let buffer = request.outbound_buffer.max(1);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer.max(64));
        let id = ConnectionId::new();

        let peer = MemoryPeer {
            id: id.clone(),
            auth: request.credential.auth_frame(),
            frames: out_rx,
            events: in_tx,
        };
        let _ = self.peers.send(peer);

        Ok(TransportLink {
            id: Some(id),
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server side of one in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    id: ConnectionId,
    auth: Frame,
    frames: mpsc::Receiver<Frame>,
    events: mpsc::Sender<LinkEvent>,
}

impl MemoryPeer {
    /// Connection id handed to the client.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Auth frame the client presented.
    pub fn auth(&self) -> &Frame {
        &self.auth
    }

    /// Deliver an event to the client. Returns `false` once the client
    /// side is gone.
    pub async fn push(&self, event: &str, data: Value) -> bool {
        self.events
            .send(LinkEvent::Frame(Frame::new(event, data)))
            .await
            .is_ok()
    }

    /// Close the link from the server side.
    pub async fn close(self, reason: &str) {
        let _ = self.events.send(LinkEvent::Closed(reason.to_owned())).await;
    }

    /// Next frame the client emitted, or `None` once the client dropped
    /// its end.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }
}
