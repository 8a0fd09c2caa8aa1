//! Transport-level error taxonomy.
//!
//! These errors never cross the public connection-manager boundary. The
//! transport and reconnect driver use them to decide whether to retry, and
//! log them; callers only observe liveness transitions.

use thiserror::Error;

/// Errors raised while opening or running a realtime transport link.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The configured endpoint could not be turned into a request.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// TCP/TLS/WebSocket connection could not be established.
    #[error("connect to {endpoint} failed: {message}")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Underlying failure.
        message: String,
    },

    /// The link opened but the authentication frame could not be sent.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame could not be encoded or decoded.
    #[error("frame serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether the reconnect driver should keep trying after this error.
    ///
    /// A malformed endpoint will fail identically on every attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidEndpoint { .. })
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, RelayError>;
