//! Which sessions are currently processing, and the agent status.
//!
//! [`ProcessingState`] is the pure transition function over typed
//! [`ServerEvent`]s. [`ProcessingStateAggregator`] wraps it behind a mutex,
//! subscribes to the relevant events through the [`HandlerRegistry`] like any
//! other consumer, and publishes owned [`ProcessingSnapshot`]s on a watch
//! channel.
//!
//! Events are applied in arrival order and the last one wins; there is no
//! timestamp reconciliation between overlapping signals.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use relay_core::events::{ActivityStatus, names};
use relay_core::{AgentStatus, ServerEvent, SessionId};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::handler::Handler;
use crate::registry::HandlerRegistry;

/// Events the aggregator listens to.
pub const TRACKED_EVENTS: &[&str] = &[
    names::AGENT_STATUS,
    names::SYNC_FULL,
    names::SESSION_MESSAGE,
    names::MESSAGE_STATUS,
    names::SESSION_ACTIVITY,
    names::SESSION_HALTED,
    names::TASK_COMPLETE,
    names::TASK_FAILED,
    names::TASK_CANCELLED,
    names::TASK_UPDATED,
];

/// Owned, read-only view of the aggregated state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessingSnapshot {
    /// Current agent status.
    pub agent_status: AgentStatus,
    /// Sessions believed busy, sorted.
    pub sessions: BTreeSet<SessionId>,
}

impl ProcessingSnapshot {
    /// Whether `session_id` is in the busy set.
    pub fn is_processing(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }
}

/// Busy-session set plus agent status.
#[derive(Clone, Debug, Default)]
pub struct ProcessingState {
    sessions: HashSet<SessionId>,
    agent_status: AgentStatus,
}

impl ProcessingState {
    /// Apply one event. Returns whether anything changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::SessionMessage(p) => self.sessions.insert(p.session_id.clone()),
            ServerEvent::MessageStatus(p) if p.status.ends_processing() => {
                self.sessions.remove(&p.session_id)
            }
            ServerEvent::SessionActivity(p) => match p.activity.status {
                ActivityStatus::Running => self.sessions.insert(p.session_id.clone()),
                ActivityStatus::Complete => self.sessions.remove(&p.session_id),
                ActivityStatus::Unknown => false,
            },
            ServerEvent::SessionHalted(p) => self.sessions.remove(&p.session_id),
            ServerEvent::TaskComplete(p)
            | ServerEvent::TaskFailed(p)
            | ServerEvent::TaskCancelled(p) => {
                p.session_id.as_ref().is_some_and(|id| self.sessions.remove(id))
            }
            ServerEvent::TaskUpdated(p) if p.state.is_terminal() => {
                p.session_id.as_ref().is_some_and(|id| self.sessions.remove(id))
            }
            ServerEvent::SyncFull(p) => {
                let mut changed = false;
                if let Some(sessions) = &p.processing_sessions {
                    let next: HashSet<SessionId> = sessions.iter().cloned().collect();
                    changed |= next != self.sessions;
                    self.sessions = next;
                }
                if let Some(status) = p.agent_status {
                    changed |= self.set_agent_status(status);
                }
                changed
            }
            ServerEvent::AgentStatus(p) => self.set_agent_status(p.status),
            ServerEvent::Disconnect(_) => self.reset(),
            ServerEvent::Connect
            | ServerEvent::MessageStatus(_)
            | ServerEvent::TaskUpdated(_) => false,
        }
    }

    /// Clear the busy set and force the agent offline.
    pub fn reset(&mut self) -> bool {
        let changed = !self.sessions.is_empty() || self.agent_status != AgentStatus::Offline;
        self.sessions.clear();
        self.agent_status = AgentStatus::Offline;
        changed
    }

    fn set_agent_status(&mut self, status: AgentStatus) -> bool {
        let changed = self.agent_status != status;
        self.agent_status = status;
        changed
    }

    /// Whether `session_id` is in the busy set.
    pub fn is_processing(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }

    /// Current agent status.
    pub fn agent_status(&self) -> AgentStatus {
        self.agent_status
    }

    /// Owned snapshot.
    pub fn snapshot(&self) -> ProcessingSnapshot {
        ProcessingSnapshot {
            agent_status: self.agent_status,
            sessions: self.sessions.iter().cloned().collect(),
        }
    }
}

/// Shared aggregator fed by realtime events.
pub struct ProcessingStateAggregator {
    state: Mutex<ProcessingState>,
    tx: watch::Sender<ProcessingSnapshot>,
    installed: Mutex<Vec<(&'static str, Handler)>>,
}

impl Default for ProcessingStateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStateAggregator {
    /// Create an aggregator with an empty busy set and the agent offline.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProcessingSnapshot::default());
        Self {
            state: Mutex::new(ProcessingState::default()),
            tx,
            installed: Mutex::new(Vec::new()),
        }
    }

    /// Register the aggregator's handlers with `registry`.
    ///
    /// Calling this more than once has no further effect.
    pub fn install(self: &Arc<Self>, registry: &HandlerRegistry) {
        let mut installed = self.installed.lock();
        if !installed.is_empty() {
            return;
        }
        for &event in TRACKED_EVENTS {
            let weak: Weak<Self> = Arc::downgrade(self);
            let handler = Handler::new(move |payload| {
                if let Some(agg) = weak.upgrade() {
                    agg.handle(event, payload);
                }
            });
            let _ = registry.register(event, handler.clone());
            installed.push((event, handler));
        }
        debug!(events = installed.len(), "processing aggregator installed");
    }

    /// Remove the handlers added by [`install`](Self::install).
    pub fn uninstall(&self, registry: &HandlerRegistry) {
        for (event, handler) in self.installed.lock().drain(..) {
            let _ = registry.unregister(event, &handler);
        }
    }

    /// Parse and apply a raw event. Unknown events and malformed payloads
    /// are ignored.
    pub fn handle(&self, event: &str, payload: &Value) {
        match ServerEvent::parse(event, payload) {
            Ok(Some(parsed)) => {
                let _ = self.apply(&parsed);
            }
            Ok(None) => trace!(event, "ignoring unknown event"),
            Err(e) => debug!(event, error = %e, "ignoring malformed payload"),
        }
    }

    /// Apply a typed event. Returns whether the state changed.
    pub fn apply(&self, event: &ServerEvent) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if !state.apply(event) {
                return false;
            }
            state.snapshot()
        };
        trace!(
            event = event.name(),
            busy = snapshot.sessions.len(),
            agent_status = %snapshot.agent_status,
            "processing state changed"
        );
        let _ = self.tx.send_replace(snapshot);
        true
    }

    /// Clear the busy set and force the agent offline.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.state.lock();
            if !state.reset() {
                return;
            }
            state.snapshot()
        };
        debug!("processing state reset");
        let _ = self.tx.send_replace(snapshot);
    }

    /// Show the agent as `connecting` while a link attempt is in flight,
    /// unless a server-reported status is already in place.
    pub fn mark_connecting(&self) {
        let snapshot = {
            let mut state = self.state.lock();
            if state.agent_status != AgentStatus::Offline {
                return;
            }
            state.agent_status = AgentStatus::Connecting;
            state.snapshot()
        };
        let _ = self.tx.send_replace(snapshot);
    }

    /// Whether `session_id` is believed busy.
    pub fn is_processing(&self, session_id: &str) -> bool {
        self.state.lock().is_processing(session_id)
    }

    /// Busy sessions, sorted.
    pub fn processing_sessions(&self) -> Vec<SessionId> {
        self.state.lock().snapshot().sessions.into_iter().collect()
    }

    /// Current agent status.
    pub fn agent_status(&self) -> AgentStatus {
        self.state.lock().agent_status()
    }

    /// Owned snapshot of the current state.
    pub fn snapshot(&self) -> ProcessingSnapshot {
        self.state.lock().snapshot()
    }

    /// Receive a new snapshot on every change.
    pub fn subscribe(&self) -> watch::Receiver<ProcessingSnapshot> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for ProcessingStateAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingStateAggregator")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
