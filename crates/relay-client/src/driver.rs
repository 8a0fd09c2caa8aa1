//! # Reconnect driver
//!
//! Opens links through a [`Transport`] and feeds the manager's state
//! machine until cancelled or out of attempts.
//!
//! 1. Reports `on_connecting` and opens a link
//! 2. On success, pumps inbound frames into the manager until the link
//!    closes, then reports `on_disconnected`
//! 3. On failure, waits the policy's fixed delay and tries again
//! 4. Gives up after `max_attempts` consecutive failures, leaving the
//!    manager disconnected and the agent offline
//!
//! A successful connect resets the failure counter. Cancellation always
//! ends with `on_disconnected`, so the live connection is closed before the
//! driver returns.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::manager::ConnectionManager;
use crate::transport::{LinkEvent, Transport, TransportLink};

/// Close reason used when the client shuts a link down.
pub const SHUTDOWN_REASON: &str = "client shutdown";

/// Why the driver stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverExit {
    /// The cancellation token fired.
    Cancelled,
    /// `attempts` consecutive opens failed.
    Exhausted {
        /// Failed attempts in the final run.
        attempts: u32,
    },
    /// The transport reported an error retrying cannot fix.
    Fatal(String),
}

/// Drive `manager` until cancelled or out of attempts.
pub async fn run(
    manager: Arc<ConnectionManager>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> DriverExit {
    let policy = manager.policy();
    let max_attempts = policy.max_attempts.max(1);
    let request = manager.config().link_request();
    let mut failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            manager.on_disconnected(SHUTDOWN_REASON);
            return DriverExit::Cancelled;
        }

        manager.on_connecting();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                manager.on_disconnected(SHUTDOWN_REASON);
                return DriverExit::Cancelled;
            }
            result = transport.open(&request) => result,
        };

        match opened {
            Ok(link) => {
                failures = 0;
                if run_link(&manager, link, &cancel).await {
                    return DriverExit::Cancelled;
                }
            }
            Err(e) if !e.is_retryable() => {
                error!(endpoint = %request.endpoint, error = %e, "realtime link cannot be opened");
                manager.on_disconnected(&e.to_string());
                return DriverExit::Fatal(e.to_string());
            }
            Err(e) => {
                failures += 1;
                manager.on_disconnected(&e.to_string());
                if failures >= max_attempts {
                    warn!(
                        endpoint = %request.endpoint,
                        attempts = failures,
                        error = %e,
                        "reconnect attempts exhausted; staying offline"
                    );
                    return DriverExit::Exhausted { attempts: failures };
                }
                warn!(
                    endpoint = %request.endpoint,
                    attempt = failures,
                    max_attempts,
                    delay_ms = policy.delay.as_millis(),
                    error = %e,
                    "connect attempt failed; retrying"
                );
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                manager.on_disconnected(SHUTDOWN_REASON);
                return DriverExit::Cancelled;
            }
            () = tokio::time::sleep(policy.delay) => {}
        }
    }
}

/// Pump one link. Returns `true` if it ended because of cancellation.
async fn run_link(
    manager: &ConnectionManager,
    link: TransportLink,
    cancel: &CancellationToken,
) -> bool {
    let TransportLink {
        id,
        outbound,
        mut inbound,
    } = link;
    let _ = manager.on_connected(id, outbound);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                manager.on_disconnected(SHUTDOWN_REASON);
                return true;
            }
            event = inbound.recv() => match event {
                Some(LinkEvent::Frame(frame)) => manager.on_frame(&frame),
                Some(LinkEvent::Closed(reason)) => {
                    info!(reason = %reason, "realtime link closed");
                    manager.on_disconnected(&reason);
                    return false;
                }
                None => {
                    manager.on_disconnected("transport ended");
                    return false;
                }
            },
        }
    }
}
