//! In-process intent bus.
//!
//! Lets unrelated parts of the UI ask for an entity editor or a new session
//! without threading callbacks through each other. Independent of the
//! realtime connection: intents flow whether or not a link is up.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Kind of entity an editor can be opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Specification document.
    Spec,
    /// Reusable prompt.
    Prompt,
    /// Free-form document.
    Document,
    /// Agent definition.
    Agent,
    /// Workspace.
    Workspace,
}

/// Whether the editor creates a new entity or edits an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    /// New entity.
    Create,
    /// Existing entity.
    Edit,
}

/// A request published on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Intent {
    /// Open the editor for an entity.
    OpenEntityEditor {
        /// Entity kind.
        kind: EntityKind,
        /// Create or edit.
        mode: EditorMode,
        /// Entity id when editing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Start a new session.
    CreateSession {
        /// Workspace the session belongs to.
        workspace_id: String,
        /// Agent to run, if not the workspace default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        /// Initial prompt, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
}

impl Intent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenEntityEditor { .. } => "open-entity-editor",
            Self::CreateSession { .. } => "create-session",
        }
    }
}

/// Broadcast bus for [`Intent`]s.
#[derive(Clone, Debug)]
pub struct IntentBus {
    tx: broadcast::Sender<Intent>,
}

impl IntentBus {
    /// Create a bus that buffers up to `capacity` intents per slow receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Build a bus from loaded settings.
    pub fn from_settings(settings: &relay_settings::BusSettings) -> Self {
        Self::new(settings.capacity)
    }

    /// Publish `intent` to every current subscriber and return how many were
    /// reached. No subscribers is not an error.
    pub fn publish(&self, intent: Intent) -> usize {
        let label = intent.label();
        let reached = self.tx.send(intent).unwrap_or(0);
        debug!(intent = label, reached, "intent published");
        reached
    }

    /// Receive every intent published from now on.
    pub fn subscribe(&self) -> IntentReceiver {
        IntentReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for IntentBus {
    fn default() -> Self {
        Self::from_settings(&relay_settings::BusSettings::default())
    }
}

/// Subscription handle returned by [`IntentBus::subscribe`].
#[derive(Debug)]
pub struct IntentReceiver {
    rx: broadcast::Receiver<Intent>,
}

impl IntentReceiver {
    /// Wait for the next intent. Returns `None` once every bus handle is
    /// dropped. Intents missed by a lagging receiver are skipped.
    pub async fn recv(&mut self) -> Option<Intent> {
        loop {
            match self.rx.recv().await {
                Ok(intent) => return Some(intent),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "intent receiver lagged; skipping missed intents");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next intent if one is already queued.
    pub fn try_recv(&mut self) -> Option<Intent> {
        loop {
            match self.rx.try_recv() {
                Ok(intent) => return Some(intent),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "intent receiver lagged; skipping missed intents");
                }
                Err(_) => return None,
            }
        }
    }
}
