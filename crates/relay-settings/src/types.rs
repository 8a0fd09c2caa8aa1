//! Settings type definitions.
//!
//! All types use camelCase field names in JSON and implement [`Default`]
//! with production values. `#[serde(default)]` allows partial files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// API key presented when no bearer token is available.
pub const DEFAULT_FALLBACK_API_KEY: &str = "relay-local-dev-key";

/// Root settings for the realtime client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Connection target and credentials.
    pub connection: ConnectionSettings,
    /// Reconnection policy.
    pub reconnect: ReconnectSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// In-process intent bus.
    pub bus: BusSettings,
}

/// Where to connect and how to authenticate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Bearer token. When absent the fallback API key is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Fixed fallback API key.
    pub fallback_api_key: String,
    /// Capacity of the outbound frame queue per connection.
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:3001/realtime".to_string(),
            token: None,
            fallback_api_key: DEFAULT_FALLBACK_API_KEY.to_string(),
            outbound_buffer: 256,
        }
    }
}

/// Bounded, fixed-delay reconnection policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Maximum consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl ReconnectSettings {
    /// Delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`..`error`), overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Intent bus configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Buffered intents per subscriber before lagging.
    pub capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}
