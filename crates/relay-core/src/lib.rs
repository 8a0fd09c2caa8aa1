//! # relay-core
//!
//! Foundation types shared by every Relay crate:
//!
//! - **Branded IDs**: `SessionId`, `TaskId`, `MessageId`, `ConnectionId`
//! - **Wire events**: event names, typed payloads, and the [`events::Frame`]
//!   envelope carried over the realtime stream
//! - **Errors**: [`errors::RelayError`] for transport-level failures
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;

pub use errors::{RelayError, Result};
pub use events::{AgentStatus, Frame, ServerEvent};
pub use ids::{ConnectionId, MessageId, SessionId, TaskId};
