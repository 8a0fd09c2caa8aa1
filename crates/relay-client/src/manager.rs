//! Connection manager: the `{disconnected, connecting, connected}` state
//! machine that owns the single live [`Connection`].
//!
//! The manager never opens sockets itself. A driver (see
//! [`crate::driver`]) opens links through a [`Transport`](crate::transport::Transport)
//! and reports lifecycle transitions here:
//!
//! ```text
//! on_connecting ──► on_connected ──► on_frame* ──► on_disconnected
//!       ▲                                               │
//!       └───────────────────────────────────────────────┘
//! ```
//!
//! Failures never surface as errors. Callers observe them only through
//! [`ConnectionManager::state`], [`ConnectionManager::is_connected`] and the
//! log.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::events::names;
use relay_core::{ConnectionId, Frame};
use relay_settings::{ReconnectSettings, RelaySettings};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState};
use crate::credential::Credential;
use crate::processing::ProcessingStateAggregator;
use crate::registry::HandlerRegistry;
use crate::singleton::{InstanceGuard, InstanceRegistry};
use crate::transport::LinkRequest;

/// Fixed reconnect cap and fixed delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up. At least one attempt is
    /// always made.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            delay: settings.delay(),
        }
    }
}

/// Everything a manager is constructed from. Changing any of it means
/// building a new manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// `ws://` or `wss://` endpoint.
    pub endpoint: String,
    /// Credential presented on every link.
    pub credential: Credential,
    /// Reconnect behaviour.
    pub policy: ReconnectPolicy,
    /// Outbound frame queue capacity per link.
    pub outbound_buffer: usize,
}

impl ManagerConfig {
    /// Build a config for `endpoint`, preferring `token` over the fallback key.
    pub fn new(endpoint: impl Into<String>, token: Option<&str>, fallback_api_key: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::resolve(token, fallback_api_key),
            policy: ReconnectPolicy::default(),
            outbound_buffer: relay_settings::ConnectionSettings::default().outbound_buffer,
        }
    }

    /// Build a config from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let conn = &settings.connection;
        Self {
            endpoint: conn.endpoint.clone(),
            credential: Credential::resolve(conn.token.as_deref(), &conn.fallback_api_key),
            policy: ReconnectPolicy::from(&settings.reconnect),
            outbound_buffer: conn.outbound_buffer,
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Request a transport needs to open one link for this config.
    pub fn link_request(&self) -> LinkRequest {
        LinkRequest {
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            outbound_buffer: self.outbound_buffer,
        }
    }
}

#[derive(Default)]
struct ManagerState {
    state: ConnectionState,
    connection: Option<Arc<Connection>>,
    last_connection_id: Option<ConnectionId>,
}

/// Owns exactly one live connection at a time.
pub struct ConnectionManager {
    config: ManagerConfig,
    registry: Arc<HandlerRegistry>,
    processing: Arc<ProcessingStateAggregator>,
    inner: Mutex<ManagerState>,
    _guard: InstanceGuard,
}

impl ConnectionManager {
    /// Create a manager and report it to `instances`.
    pub fn new(
        config: ManagerConfig,
        registry: Arc<HandlerRegistry>,
        processing: Arc<ProcessingStateAggregator>,
        instances: &Arc<InstanceRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            processing,
            inner: Mutex::new(ManagerState::default()),
            _guard: instances.guard(),
        }
    }

    /// A link attempt is starting.
    pub fn on_connecting(&self) {
        self.inner.lock().state = ConnectionState::Connecting;
        self.processing.mark_connecting();
        debug!(endpoint = %self.config.endpoint, "connecting");
    }

    /// A link is up. Builds a fresh [`Connection`], replays every tracked
    /// handler onto it, then dispatches `connect`.
    pub fn on_connected(
        &self,
        id: Option<ConnectionId>,
        outbound: mpsc::Sender<Frame>,
    ) -> Arc<Connection> {
        if self.inner.lock().connection.is_some() {
            self.on_disconnected("superseded by new link");
        }

        let conn = Arc::new(Connection::new(
            id.clone(),
            self.config.credential.clone(),
            outbound,
        ));
        {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Connected;
            inner.connection = Some(Arc::clone(&conn));
            if id.is_some() {
                inner.last_connection_id = id;
            }
        }

        let replayed = self.registry.replay_all(&conn);
        info!(
            endpoint = %self.config.endpoint,
            connection_id = ?conn.id(),
            replayed,
            fallback_key = conn.credential().is_fallback(),
            "connected"
        );
        let _ = conn.dispatch(names::CONNECT, &Value::Null);
        conn
    }

    /// The link is gone. Clears processing state unconditionally and
    /// dispatches `disconnect` on the dying connection.
    pub fn on_disconnected(&self, reason: &str) {
        let dying = {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Disconnected;
            inner.connection.take()
        };

        let Some(conn) = dying else {
            self.processing.reset();
            return;
        };

        conn.mark_dead();
        self.registry.release(&conn);
        self.processing.reset();
        let _ = conn.dispatch(names::DISCONNECT, &json!({ "reason": reason }));
        info!(
            endpoint = %self.config.endpoint,
            connection_id = ?conn.id(),
            reason,
            uptime_ms = conn.age().as_millis(),
            dropped_frames = conn.drop_count(),
            "disconnected"
        );
    }

    /// Dispatch an inbound frame through the live connection.
    pub fn on_frame(&self, frame: &Frame) {
        let Some(conn) = self.live_connection() else {
            debug!(event = %frame.event, "dropping frame without a live connection");
            return;
        };
        let handled = conn.dispatch(&frame.event, &frame.data);
        if handled == 0 {
            debug!(event = %frame.event, "no handlers for event");
        }
    }

    /// Send an event to the server. Returns `false` without sending when
    /// there is no live connection or the outbound queue is full.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        match self.live_connection() {
            Some(conn) => conn.send(Frame::new(event, payload)),
            None => {
                warn!(event, "emit while disconnected; dropped");
                false
            }
        }
    }

    fn live_connection(&self) -> Option<Arc<Connection>> {
        self.inner
            .lock()
            .connection
            .as_ref()
            .filter(|c| c.is_live())
            .cloned()
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ConnectionState::Connected
            && inner.connection.as_ref().is_some_and(|c| c.is_live())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Last server-assigned connection id, if any was seen.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.lock().last_connection_id.clone()
    }

    /// Credential this manager presents.
    pub fn credential(&self) -> &Credential {
        &self.config.credential
    }

    /// Endpoint this manager connects to.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Reconnect policy.
    pub fn policy(&self) -> ReconnectPolicy {
        self.config.policy
    }

    /// Full construction config.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The aggregator this manager resets on disconnect.
    pub fn processing(&self) -> &Arc<ProcessingStateAggregator> {
        &self.processing
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use relay_core::AgentStatus;
    use relay_core::logging::capture_logs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Level;

    struct Fixture {
        registry: Arc<HandlerRegistry>,
        processing: Arc<ProcessingStateAggregator>,
        instances: Arc<InstanceRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(HandlerRegistry::new());
            let processing = Arc::new(ProcessingStateAggregator::new());
            processing.install(&registry);
            Self {
                registry,
                processing,
                instances: Arc::new(InstanceRegistry::new("test")),
            }
        }

        fn manager(&self) -> ConnectionManager {
            ConnectionManager::new(
                ManagerConfig::new("ws://test", Some("tok"), "fallback"),
                Arc::clone(&self.registry),
                Arc::clone(&self.processing),
                &self.instances,
            )
        }
    }

    fn link() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(8)
    }

    fn counting() -> (Handler, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            Handler::new(move |_| {
                let _ = hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        (h, hits)
    }

    #[test]
    fn starts_disconnected() {
        let fx = Fixture::new();
        let m = fx.manager();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(!m.is_connected());
        assert!(m.connection_id().is_none());
        assert_eq!(m.endpoint(), "ws://test");
        assert!(!m.credential().is_fallback());
    }

    #[test]
    fn lifecycle_transitions() {
        let fx = Fixture::new();
        let m = fx.manager();

        m.on_connecting();
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(fx.processing.agent_status(), AgentStatus::Connecting);

        let (tx, _rx) = link();
        let _ = m.on_connected(Some("c1".into()), tx);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(m.is_connected());
        assert_eq!(m.connection_id().unwrap().as_str(), "c1");

        m.on_disconnected("io error");
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(!m.is_connected());
        assert_eq!(fx.processing.agent_status(), AgentStatus::Offline);
        assert_eq!(m.connection_id().unwrap().as_str(), "c1");
    }

    #[test]
    fn duplicate_registration_fires_once_across_reconnects() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (h, hits) = counting();
        let _ = fx.registry.register("ping", h.clone());
        let _ = fx.registry.register("ping", h.clone());

        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        let _ = fx.registry.register("ping", h);
        m.on_frame(&Frame::new("ping", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        m.on_disconnected("blip");
        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        m.on_frame(&Frame::new("ping", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn old_connection_is_dead_and_frames_route_to_new() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (h, hits) = counting();
        let _ = fx.registry.register("ping", h);

        let (tx, _rx) = link();
        let old = m.on_connected(None, tx);
        m.on_disconnected("blip");
        let (tx, _rx2) = link();
        let _ = m.on_connected(None, tx);

        assert_eq!(old.dispatch("ping", &Value::Null), 1);
        assert!(!old.is_live());
        m.on_frame(&Frame::new("ping", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connect_fires_after_replay() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (probe, connects) = counting();
        let _ = fx.registry.register("connect", probe);

        let (tx, _rx) = link();
        let conn = m.on_connected(None, tx);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(conn.listener_count("connect"), 1);
        assert_eq!(conn.listener_count("session-message"), 1);
    }

    #[test]
    fn disconnect_clears_processing_unconditionally() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        m.on_frame(&Frame::new("session-message", json!({"sessionId": "s1"})));
        m.on_frame(&Frame::new("agent-status", json!({"status": "online"})));
        assert!(fx.processing.is_processing("s1"));

        m.on_disconnected("network");
        assert!(!fx.processing.is_processing("s1"));
        assert_eq!(fx.processing.agent_status(), AgentStatus::Offline);
    }

    #[test]
    fn disconnect_handler_receives_reason() {
        let fx = Fixture::new();
        let m = fx.manager();
        let reason = Arc::new(parking_lot::Mutex::new(String::new()));
        let h = {
            let reason = reason.clone();
            Handler::new(move |v| {
                *reason.lock() = v["reason"].as_str().unwrap_or_default().to_owned();
            })
        };
        let _ = fx.registry.register("disconnect", h);

        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        m.on_disconnected("server restart");
        assert_eq!(*reason.lock(), "server restart");
    }

    #[test]
    fn emit_while_offline_returns_false() {
        let (logs, _guard) = capture_logs();
        let fx = Fixture::new();
        let m = fx.manager();
        assert!(!m.emit("hello", json!({})));
        assert!(logs.has_event(Level::WARN, "emit while disconnected"));

        let (tx, mut rx) = link();
        let _ = m.on_connected(None, tx);
        m.on_disconnected("gone");
        assert!(!m.emit("hello", json!({})));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_while_live_sends() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (tx, mut rx) = link();
        let _ = m.on_connected(None, tx);
        assert!(m.emit("hello", json!({"a": 1})));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "hello");
        assert_eq!(frame.data["a"], 1);
    }

    #[test]
    fn frame_without_connection_is_dropped() {
        let fx = Fixture::new();
        let m = fx.manager();
        m.on_frame(&Frame::new("session-message", json!({"sessionId": "s1"})));
        assert!(!fx.processing.is_processing("s1"));
    }

    #[test]
    fn unregister_mid_dispatch_is_safe() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (second, second_hits) = counting();
        let first = {
            let registry = Arc::clone(&fx.registry);
            let second = second.clone();
            Handler::new(move |_| {
                let _ = registry.unregister("tick", &second);
            })
        };
        let _ = fx.registry.register("tick", first);
        let _ = fx.registry.register("tick", second);

        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        m.on_frame(&Frame::new("tick", Value::Null));
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
        m.on_frame(&Frame::new("tick", Value::Null));
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_earlier_sibling_does_not_skip_later() {
        let fx = Fixture::new();
        let m = fx.manager();
        let hits = Arc::new(AtomicUsize::new(0));
        let weighted = |n: usize| {
            let hits = hits.clone();
            Handler::new(move |_| {
                let _ = hits.fetch_add(n, Ordering::SeqCst);
            })
        };
        let a = weighted(1);
        let c = weighted(10);
        let b = {
            let registry = Arc::clone(&fx.registry);
            let a = a.clone();
            Handler::new(move |_| {
                let _ = registry.unregister("tick", &a);
            })
        };
        let _ = fx.registry.register("tick", a);
        let _ = fx.registry.register("tick", b);
        let _ = fx.registry.register("tick", c);

        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        m.on_frame(&Frame::new("tick", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 11);
        m.on_frame(&Frame::new("tick", Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn agent_status_stays_connecting_until_server_reports() {
        let fx = Fixture::new();
        let m = fx.manager();
        m.on_connecting();
        let (tx, _rx) = link();
        let _ = m.on_connected(None, tx);
        assert_eq!(fx.processing.agent_status(), AgentStatus::Connecting);

        m.on_frame(&Frame::new("agent-status", json!({"status": "online"})));
        assert_eq!(fx.processing.agent_status(), AgentStatus::Online);

        m.on_disconnected("blip");
        m.on_connecting();
        let (tx, _rx2) = link();
        let _ = m.on_connected(None, tx);
        assert_eq!(fx.processing.agent_status(), AgentStatus::Connecting);
        m.on_frame(&Frame::new(
            "sync-full",
            json!({"processingSessions": [], "agentStatus": "offline"}),
        ));
        assert_eq!(fx.processing.agent_status(), AgentStatus::Offline);
    }

    #[test]
    fn second_live_manager_logs_error() {
        let (logs, _guard) = capture_logs();
        let fx = Fixture::new();
        let first = fx.manager();
        assert_eq!(fx.instances.count(), 1);
        let second = fx.manager();
        assert_eq!(fx.instances.count(), 2);
        assert!(logs.has_event(Level::ERROR, "multiple live instances"));
        drop(first);
        drop(second);
        assert_eq!(fx.instances.count(), 0);
    }

    #[test]
    fn on_connected_supersedes_existing_link() {
        let fx = Fixture::new();
        let m = fx.manager();
        let (tx, _rx) = link();
        let first = m.on_connected(None, tx);
        let (tx, _rx2) = link();
        let second = m.on_connected(None, tx);
        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(m.is_connected());
    }

    #[test]
    fn config_from_settings_uses_fallback_without_token() {
        let settings = RelaySettings::default();
        let config = ManagerConfig::from_settings(&settings);
        assert!(config.credential.is_fallback());
        assert_eq!(config.policy.max_attempts, settings.reconnect.max_attempts);
        assert_eq!(config.link_request().endpoint, settings.connection.endpoint);
    }
}
