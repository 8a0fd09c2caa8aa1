//! Application-facing facade.
//!
//! [`RealtimeClient`] owns the long-lived pieces (handler registry,
//! processing aggregator, transport) and at most one
//! [`ConnectionManager`] plus its driver task. Handler registrations and
//! processing state outlive any individual manager.
//!
//! Changing the endpoint or credential goes through
//! [`RealtimeClient::reconfigure`], which shuts the old driver down
//! completely, including disconnect handling, before the new manager is
//! built. There is never a live credential swap.

use std::sync::Arc;

use parking_lot::RwLock;
use relay_core::{AgentStatus, ConnectionId, SessionId};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionState;
use crate::driver::{self, DriverExit, SHUTDOWN_REASON};
use crate::handler::Handler;
use crate::manager::{ConnectionManager, ManagerConfig};
use crate::processing::{ProcessingSnapshot, ProcessingStateAggregator};
use crate::registry::HandlerRegistry;
use crate::singleton::InstanceRegistry;
use crate::transport::Transport;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<DriverExit>,
}

/// Shared realtime client.
pub struct RealtimeClient {
    registry: Arc<HandlerRegistry>,
    processing: Arc<ProcessingStateAggregator>,
    instances: Arc<InstanceRegistry>,
    transport: Arc<dyn Transport>,
    current: RwLock<Option<Arc<ConnectionManager>>>,
    lifecycle: Mutex<Option<Running>>,
}

impl RealtimeClient {
    /// Create a client over `transport`, reporting managers to `instances`.
    pub fn new(transport: Arc<dyn Transport>, instances: Arc<InstanceRegistry>) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let processing = Arc::new(ProcessingStateAggregator::new());
        processing.install(&registry);
        Self {
            registry,
            processing,
            instances,
            transport,
            current: RwLock::new(None),
            lifecycle: Mutex::new(None),
        }
    }

    /// Create a client that reports to the process-wide instance registry.
    pub fn with_global_instances(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, InstanceRegistry::global())
    }

    /// Start connecting with `config`. Same as [`reconfigure`](Self::reconfigure).
    pub async fn start(&self, config: ManagerConfig) -> bool {
        self.reconfigure(config).await
    }

    /// Tear down the current manager and start a new one for `config`.
    ///
    /// Returns `false` without touching anything when a driver is already
    /// running with an identical config.
    pub async fn reconfigure(&self, config: ManagerConfig) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;

        let unchanged = lifecycle
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
            && self
                .current
                .read()
                .as_ref()
                .is_some_and(|m| *m.config() == config);
        if unchanged {
            debug!(endpoint = %config.endpoint, "reconfigure with identical config ignored");
            return false;
        }

        self.stop_locked(&mut lifecycle).await;

        let endpoint = config.endpoint.clone();
        let fallback_key = config.credential.is_fallback();
        let manager = Arc::new(ConnectionManager::new(
            config,
            Arc::clone(&self.registry),
            Arc::clone(&self.processing),
            &self.instances,
        ));
        *self.current.write() = Some(Arc::clone(&manager));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(driver::run(
            manager,
            Arc::clone(&self.transport),
            cancel.clone(),
        ));
        *lifecycle = Some(Running { cancel, handle });
        info!(endpoint = %endpoint, fallback_key, "realtime client started");
        true
    }

    /// Stop the driver and drop the manager. The client stays usable and can
    /// be started again.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await;
    }

    async fn stop_locked(&self, lifecycle: &mut Option<Running>) {
        if let Some(running) = lifecycle.take() {
            running.cancel.cancel();
            match running.handle.await {
                Ok(exit) => debug!(?exit, "driver stopped"),
                Err(e) => warn!(error = %e, "driver task failed"),
            }
        }
        let previous = self.current.write().take();
        if let Some(manager) = previous {
            manager.on_disconnected(SHUTDOWN_REASON);
        }
    }

    /// Track `handler` for `event` across every present and future
    /// connection.
    pub fn register(&self, event: &str, handler: Handler) -> bool {
        self.registry.register(event, handler)
    }

    /// Stop tracking `handler` for `event`.
    pub fn unregister(&self, event: &str, handler: &Handler) -> bool {
        self.registry.unregister(event, handler)
    }

    /// Send an event if a connection is live. Returns `false` otherwise.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let manager = self.current.read().clone();
        match manager {
            Some(manager) => manager.emit(event, payload),
            None => {
                warn!(event, "emit before the client was started; dropped");
                false
            }
        }
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|m| m.is_connected())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.current
            .read()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |m| m.state())
    }

    /// Last server-assigned connection id of the current manager.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.current.read().as_ref().and_then(|m| m.connection_id())
    }

    /// Current manager, if started.
    pub fn manager(&self) -> Option<Arc<ConnectionManager>> {
        self.current.read().clone()
    }

    /// Handler registry shared by every manager.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Processing aggregator.
    pub fn processing(&self) -> &Arc<ProcessingStateAggregator> {
        &self.processing
    }

    /// Whether `session_id` is believed busy.
    pub fn is_processing(&self, session_id: &str) -> bool {
        self.processing.is_processing(session_id)
    }

    /// Busy sessions, sorted.
    pub fn processing_sessions(&self) -> Vec<SessionId> {
        self.processing.processing_sessions()
    }

    /// Current agent status.
    pub fn agent_status(&self) -> AgentStatus {
        self.processing.agent_status()
    }

    /// Snapshot stream for the processing view.
    pub fn subscribe(&self) -> watch::Receiver<ProcessingSnapshot> {
        self.processing.subscribe()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("manager", &*self.current.read())
            .finish_non_exhaustive()
    }
}
