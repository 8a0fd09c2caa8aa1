//! # relay-monitor
//!
//! Connects to a Relay server over the shared realtime client and logs the
//! agent status and the set of busy sessions every time either changes.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_client::{Handler, ManagerConfig, RealtimeClient, WebSocketTransport};
use relay_core::events::names;
use relay_settings::RelaySettings;

/// Relay realtime monitor.
#[derive(Parser, Debug)]
#[command(name = "relay-monitor", about = "Log Relay agent status and busy sessions")]
struct Cli {
    /// Server endpoint (overrides settings).
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token. Without one the fallback API key is used.
    #[arg(long)]
    token: Option<String>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

/// Load settings and apply command-line overrides on top.
fn resolve_settings(cli: &Cli) -> Result<RelaySettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(ref endpoint) = cli.endpoint {
        settings.connection.endpoint.clone_from(endpoint);
    }
    if let Some(ref token) = cli.token {
        settings.connection.token = Some(token.clone());
    }
    if let Some(ref level) = cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.json_logs {
        settings.logging.json = true;
    }

    relay_settings::loader::validate(&settings).context("Invalid settings")?;
    Ok(settings)
}

fn log_lifecycle(client: &RealtimeClient) {
    let _ = client.register(
        names::CONNECT,
        Handler::new(|_| tracing::info!("realtime link up")),
    );
    let _ = client.register(
        names::DISCONNECT,
        Handler::new(|payload| {
            let reason = payload
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown");
            tracing::warn!(reason, "realtime link down");
        }),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    if settings.logging.json {
        relay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        relay_core::logging::init_subscriber(&settings.logging.level);
    }

    let client = RealtimeClient::with_global_instances(Arc::new(WebSocketTransport::new()));
    log_lifecycle(&client);

    let mut snapshots = client.subscribe();
    let config = ManagerConfig::from_settings(&settings);
    tracing::info!(
        endpoint = %config.endpoint,
        fallback_key = config.credential.is_fallback(),
        max_attempts = config.policy.max_attempts,
        "starting relay monitor"
    );
    let _ = client.start(config).await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let busy: Vec<&str> = snapshot
                    .sessions
                    .iter()
                    .map(relay_core::SessionId::as_str)
                    .collect();
                tracing::info!(
                    agent_status = %snapshot.agent_status,
                    busy_count = busy.len(),
                    busy = ?busy,
                    "processing state"
                );
            }
        }
    }

    tracing::info!("Shutting down...");
    client.shutdown().await;
    Ok(())
}
