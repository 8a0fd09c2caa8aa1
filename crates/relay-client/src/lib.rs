//! # relay-client
//!
//! Client side of the Relay realtime stream:
//!
//! - **Connection manager**: one live connection, a
//!   `{disconnected, connecting, connected}` state machine, bearer token or
//!   fallback API key authentication
//! - **Handler registry**: registrations survive reconnects and are replayed
//!   onto each fresh connection exactly once
//! - **Processing aggregator**: which sessions are busy and the agent status,
//!   derived from overlapping server events and cleared on every disconnect
//! - **Instance registry**: error-level diagnostic when more than one manager
//!   is alive
//! - **Transports**: WebSocket (`tokio-tungstenite`) and in-memory
//! - **Intent bus**: connection-independent editor and session requests
//!
//! [`RealtimeClient`] ties these together for applications.

#![deny(unsafe_code)]

pub mod bus;
pub mod client;
pub mod connection;
pub mod credential;
pub mod driver;
pub mod handler;
pub mod manager;
pub mod processing;
pub mod registry;
pub mod singleton;
pub mod transport;

pub use bus::{EditorMode, EntityKind, Intent, IntentBus, IntentReceiver};
pub use client::RealtimeClient;
pub use connection::{Connection, ConnectionState};
pub use credential::Credential;
pub use driver::DriverExit;
pub use handler::Handler;
pub use manager::{ConnectionManager, ManagerConfig, ReconnectPolicy};
pub use processing::{ProcessingSnapshot, ProcessingStateAggregator};
pub use registry::HandlerRegistry;
pub use singleton::{InstanceGuard, InstanceRegistry};
pub use transport::{LinkEvent, LinkRequest, MemoryTransport, Transport, WebSocketTransport};
