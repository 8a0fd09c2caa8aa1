//! One established transport connection.
//!
//! A [`Connection`] is created for every successful (re)connect and dropped
//! when the link goes away. It carries its own listener table, so handlers
//! attached to an old connection can never fire on a new one; the registry
//! replays tracked handlers onto each fresh instance instead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::ConnectionId;
use relay_core::events::Frame;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::credential::Credential;
use crate::handler::{Handler, HandlerTable};

/// Lifecycle state of the connection manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link and no attempt in flight.
    #[default]
    Disconnected,
    /// An attempt to open a link is in flight.
    Connecting,
    /// A link is established.
    Connected,
}

/// A live (or just-closed) transport connection.
pub struct Connection {
    id: Option<ConnectionId>,
    credential: Credential,
    live: AtomicBool,
    listeners: Mutex<HandlerTable>,
    outbound: mpsc::Sender<Frame>,
    connected_at: Instant,
    dropped_frames: AtomicU64,
}

impl Connection {
    /// Wrap a freshly opened link.
    pub fn new(
        id: Option<ConnectionId>,
        credential: Credential,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            credential,
            live: AtomicBool::new(true),
            listeners: Mutex::new(HandlerTable::new()),
            outbound,
            connected_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Remote-assigned identifier, if the server provided one.
    pub fn id(&self) -> Option<&ConnectionId> {
        self.id.as_ref()
    }

    /// Credential this connection authenticated with.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether the link is still up.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Mark the link as gone. Later sends are dropped.
    pub fn mark_dead(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Attach `handler` for `event`. Returns `false` if already attached.
    pub fn attach(&self, event: &str, handler: Handler) -> bool {
        self.listeners.lock().insert(event, handler)
    }

    /// Detach `handler` from `event`. Returns `false` if it was not attached.
    pub fn detach(&self, event: &str, handler: &Handler) -> bool {
        self.listeners.lock().remove(event, handler)
    }

    /// Number of listeners attached for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().count(event)
    }

    /// Invoke every listener for `event`, in attach order.
    ///
    /// Iterates over a snapshot taken before the first call, with the lock
    /// released, so listeners may attach or detach re-entrantly. Returns the
    /// number of listeners invoked.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let snapshot = self.listeners.lock().snapshot(event);
        for handler in &snapshot {
            handler.call(payload);
        }
        snapshot.len()
    }

    /// Queue a frame for the transport.
    ///
    /// Returns `false` if the connection is dead or the queue is full or
    /// closed, and increments the dropped-frame counter.
    pub fn send(&self, frame: Frame) -> bool {
        if !self.is_live() {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = ?self.id, error = %e, "outbound frame dropped");
                false
            }
        }
    }

    /// Total frames dropped on this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn make_connection() -> (Connection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(4);
        let conn = Connection::new(
            Some("conn_1".into()),
            Credential::ApiKey("k".into()),
            tx,
        );
        (conn, rx)
    }

    #[test]
    fn new_connection_is_live() {
        let (conn, _rx) = make_connection();
        assert!(conn.is_live());
        assert_eq!(conn.id().map(ConnectionId::as_str), Some("conn_1"));
        assert!(conn.credential().is_fallback());
    }

    #[tokio::test]
    async fn send_while_live() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Frame::new("ping", json!({}))));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "ping");
    }

    #[test]
    fn send_after_mark_dead_drops() {
        let (conn, mut rx) = make_connection();
        conn.mark_dead();
        assert!(!conn.send(Frame::new("ping", json!({}))));
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(None, Credential::ApiKey("k".into()), tx);
        assert!(conn.send(Frame::new("a", Value::Null)));
        assert!(!conn.send(Frame::new("b", Value::Null)));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_queue_drops() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(!conn.send(Frame::new("a", Value::Null)));
    }

    #[test]
    fn attach_is_idempotent() {
        let (conn, _rx) = make_connection();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            Handler::new(move |_| {
                let _ = hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(conn.attach("e", h.clone()));
        assert!(!conn.attach("e", h));
        assert_eq!(conn.dispatch("e", &Value::Null), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_unknown_event_invokes_nothing() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.dispatch("nobody", &Value::Null), 0);
    }

    #[test]
    fn detach_inside_dispatch_is_safe() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(Connection::new(None, Credential::ApiKey("k".into()), tx));
        let order = Arc::new(Mutex::new(Vec::new()));

        let second = {
            let order = order.clone();
            Handler::new(move |_| order.lock().push("second"))
        };
        let first = {
            let order = order.clone();
            let conn = Arc::downgrade(&conn);
            let second = second.clone();
            Handler::new(move |_| {
                order.lock().push("first");
                if let Some(conn) = conn.upgrade() {
                    let _ = conn.detach("e", &second);
                }
            })
        };
        let _ = conn.attach("e", first);
        let _ = conn.attach("e", second);

        assert_eq!(conn.dispatch("e", &Value::Null), 2);
        assert_eq!(*order.lock(), vec!["first", "second"]);
        assert_eq!(conn.listener_count("e"), 1);

        order.lock().clear();
        assert_eq!(conn.dispatch("e", &Value::Null), 1);
        assert_eq!(*order.lock(), vec!["first"]);
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = make_connection();
        let a = conn.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.age() > a);
    }
}
