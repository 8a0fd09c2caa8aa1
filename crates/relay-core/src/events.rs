//! Realtime wire events.
//!
//! Every message on the stream is a [`Frame`]: an event name plus a JSON
//! payload. Inbound frames whose name is one of the well-known server events
//! can be lifted into a typed [`ServerEvent`]; anything else stays a raw
//! frame and is only seen by handlers registered for that name.
//!
//! Payload fields are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::ids::{MessageId, SessionId, TaskId};

/// Well-known event names.
pub mod names {
    /// Synthesized by the transport once a link is established.
    pub const CONNECT: &str = "connect";
    /// Synthesized by the transport when a link drops.
    pub const DISCONNECT: &str = "disconnect";
    /// Outbound authentication frame, first frame on every link.
    pub const AUTH: &str = "auth";
    /// Agent availability changed.
    pub const AGENT_STATUS: &str = "agent-status";
    /// Authoritative snapshot sent after (re)connect.
    pub const SYNC_FULL: &str = "sync-full";
    /// A user message was accepted and the server began work.
    pub const SESSION_MESSAGE: &str = "session-message";
    /// Per-message lifecycle status.
    pub const MESSAGE_STATUS: &str = "message-status";
    /// Activity progress inside a session.
    pub const SESSION_ACTIVITY: &str = "session-activity";
    /// Session stopped on timeout or fatal error.
    pub const SESSION_HALTED: &str = "session-halted";
    /// Background task finished successfully.
    pub const TASK_COMPLETE: &str = "task-complete";
    /// Background task failed.
    pub const TASK_FAILED: &str = "task-failed";
    /// Background task was cancelled.
    pub const TASK_CANCELLED: &str = "task-cancelled";
    /// Background task changed state.
    pub const TASK_UPDATED: &str = "task-updated";
}

/// Wire envelope for a single event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload; `null` when the event carries none.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame from an event name and payload.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Agent availability as pushed by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// The agent is reachable and accepting work.
    Online,
    /// The agent is starting up or the link is being established.
    Connecting,
    /// No agent is reachable.
    #[default]
    Offline,
}

impl AgentStatus {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Connecting => "connecting",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Queued locally or on the server.
    Pending,
    /// Delivered to the server but not picked up. Orphan recovery also
    /// resets stuck messages back to this state.
    Sent,
    /// The server is working on it.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl MessageStatus {
    /// Whether this status means the session is no longer busy.
    ///
    /// `Sent` counts: a message reset to `sent` has no work in flight.
    #[must_use]
    pub fn ends_processing(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Sent)
    }
}

/// Status of an activity inside a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    /// Activity in progress.
    Running,
    /// Activity finished.
    Complete,
    /// Any other status.
    #[serde(other)]
    Unknown,
}

/// State of a background task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting to run.
    Pending,
    /// Running.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
    /// Any other state.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// Whether no further transitions are expected.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// `disconnect` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPayload {
    /// Why the link dropped.
    pub reason: String,
}

/// `agent-status` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatusPayload {
    /// New agent status.
    pub status: AgentStatus,
}

/// `sync-full` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFullPayload {
    /// Authoritative agent status, if the server sent one.
    #[serde(default)]
    pub agent_status: Option<AgentStatus>,
    /// Authoritative list of busy sessions, if the server sent one.
    #[serde(default)]
    pub processing_sessions: Option<Vec<SessionId>>,
}

/// `session-message` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessagePayload {
    /// Session that received the message.
    pub session_id: SessionId,
}

/// `message-status` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusPayload {
    /// Owning session.
    pub session_id: SessionId,
    /// Message whose status changed.
    pub message_id: MessageId,
    /// New status.
    pub status: MessageStatus,
}

/// Inner activity descriptor of `session-activity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Free-form activity kind (tool call, thinking, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Activity status.
    pub status: ActivityStatus,
}

/// `session-activity` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivityPayload {
    /// Owning session.
    pub session_id: SessionId,
    /// Activity details.
    pub activity: Activity,
}

/// `session-halted` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHaltedPayload {
    /// Halted session.
    pub session_id: SessionId,
    /// Optional human-readable reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of `task-complete`, `task-failed` and `task-cancelled`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTerminalPayload {
    /// Finished task.
    pub task_id: TaskId,
    /// Session the task ran in, if any.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// `task-updated` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdatedPayload {
    /// Updated task.
    pub task_id: TaskId,
    /// Session the task runs in, if any.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// New task state.
    pub state: TaskState,
}

/// Typed view of a well-known inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// Link established.
    Connect,
    /// Link dropped.
    Disconnect(DisconnectPayload),
    /// Agent availability changed.
    AgentStatus(AgentStatusPayload),
    /// Authoritative snapshot.
    SyncFull(SyncFullPayload),
    /// Server began work on a user message.
    SessionMessage(SessionMessagePayload),
    /// Message lifecycle update.
    MessageStatus(MessageStatusPayload),
    /// Activity progress.
    SessionActivity(SessionActivityPayload),
    /// Session halted.
    SessionHalted(SessionHaltedPayload),
    /// Task finished successfully.
    TaskComplete(TaskTerminalPayload),
    /// Task failed.
    TaskFailed(TaskTerminalPayload),
    /// Task cancelled.
    TaskCancelled(TaskTerminalPayload),
    /// Task state changed.
    TaskUpdated(TaskUpdatedPayload),
}

impl ServerEvent {
    /// Lift a raw event into its typed form.
    ///
    /// Returns `Ok(None)` for event names that are not well-known, and an
    /// error when a well-known event carries a malformed payload.
    pub fn parse(event: &str, data: &Value) -> Result<Option<Self>> {
        fn payload<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T> {
            Ok(T::deserialize(data)?)
        }

        let parsed = match event {
            names::CONNECT => Self::Connect,
            names::DISCONNECT => Self::Disconnect(payload(data)?),
            names::AGENT_STATUS => Self::AgentStatus(payload(data)?),
            names::SYNC_FULL => {
                if data.is_null() {
                    Self::SyncFull(SyncFullPayload::default())
                } else {
                    Self::SyncFull(payload(data)?)
                }
            }
            names::SESSION_MESSAGE => Self::SessionMessage(payload(data)?),
            names::MESSAGE_STATUS => Self::MessageStatus(payload(data)?),
            names::SESSION_ACTIVITY => Self::SessionActivity(payload(data)?),
            names::SESSION_HALTED => Self::SessionHalted(payload(data)?),
            names::TASK_COMPLETE => Self::TaskComplete(payload(data)?),
            names::TASK_FAILED => Self::TaskFailed(payload(data)?),
            names::TASK_CANCELLED => Self::TaskCancelled(payload(data)?),
            names::TASK_UPDATED => Self::TaskUpdated(payload(data)?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => names::CONNECT,
            Self::Disconnect(_) => names::DISCONNECT,
            Self::AgentStatus(_) => names::AGENT_STATUS,
            Self::SyncFull(_) => names::SYNC_FULL,
            Self::SessionMessage(_) => names::SESSION_MESSAGE,
            Self::MessageStatus(_) => names::MESSAGE_STATUS,
            Self::SessionActivity(_) => names::SESSION_ACTIVITY,
            Self::SessionHalted(_) => names::SESSION_HALTED,
            Self::TaskComplete(_) => names::TASK_COMPLETE,
            Self::TaskFailed(_) => names::TASK_FAILED,
            Self::TaskCancelled(_) => names::TASK_CANCELLED,
            Self::TaskUpdated(_) => names::TASK_UPDATED,
        }
    }
}
