//! End-to-end tests against a local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

use relay_client::{
    InstanceRegistry, ManagerConfig, RealtimeClient, ReconnectPolicy, WebSocketTransport,
};
use relay_core::AgentStatus;

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerWs = WebSocketStream<TcpStream>;

/// Accept connections forever, tagging each with `srv-<n>`.
async fn boot_server() -> (String, mpsc::UnboundedReceiver<ServerWs>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    drop(tokio::spawn(async move {
        let mut n = 0u32;
        while let Ok((stream, _)) = listener.accept().await {
            n += 1;
            let id = format!("srv-{n}");
            let callback = move |_req: &Request, mut resp: Response| {
                let _ = resp
                    .headers_mut()
                    .insert("x-connection-id", HeaderValue::from_str(&id).unwrap());
                Ok(resp)
            };
            if let Ok(ws) = accept_hdr_async(stream, callback).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    }));

    (format!("ws://{addr}/realtime"), rx)
}

async fn next_json(ws: &mut ServerWs) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn push(ws: &mut ServerWs, event: &str, data: Value) {
    let text = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn wait_until(cond: impl Fn() -> bool) {
    timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn client() -> RealtimeClient {
    RealtimeClient::new(
        Arc::new(WebSocketTransport::new()),
        Arc::new(InstanceRegistry::new("it")),
    )
}

fn config(endpoint: &str, token: Option<&str>) -> ManagerConfig {
    ManagerConfig::new(endpoint, token, "fallback-key").with_policy(ReconnectPolicy {
        max_attempts: 5,
        delay: Duration::from_millis(50),
    })
}

#[tokio::test]
async fn auth_frame_is_first_and_events_flow() {
    let (url, mut accepted) = boot_server().await;
    let client = client();
    let _ = client.start(config(&url, Some("tok"))).await;

    let mut ws = timeout(TIMEOUT, accepted.recv()).await.unwrap().unwrap();
    let auth = next_json(&mut ws).await;
    assert_eq!(auth, json!({"event": "auth", "data": {"token": "tok"}}));

    wait_until(|| client.is_connected()).await;
    assert_eq!(client.connection_id().unwrap().as_str(), "srv-1");

    push(&mut ws, "agent-status", json!({"status": "online"})).await;
    push(&mut ws, "session-message", json!({"sessionId": "s1"})).await;
    wait_until(|| client.is_processing("s1")).await;
    assert_eq!(client.agent_status(), AgentStatus::Online);

    assert!(client.emit("typing", json!({"sessionId": "s1"})));
    let frame = next_json(&mut ws).await;
    assert_eq!(frame["event"], "typing");
    assert_eq!(frame["data"]["sessionId"], "s1");

    client.shutdown().await;
}

#[tokio::test]
async fn fallback_key_without_token() {
    let (url, mut accepted) = boot_server().await;
    let client = client();
    let _ = client.start(config(&url, None)).await;

    let mut ws = timeout(TIMEOUT, accepted.recv()).await.unwrap().unwrap();
    let auth = next_json(&mut ws).await;
    assert_eq!(auth["data"], json!({"apiKey": "fallback-key"}));
    client.shutdown().await;
}

#[tokio::test]
async fn server_close_clears_state_and_reconnects() {
    let (url, mut accepted) = boot_server().await;
    let client = client();
    let _ = client.start(config(&url, Some("tok"))).await;

    let mut first = timeout(TIMEOUT, accepted.recv()).await.unwrap().unwrap();
    let _ = next_json(&mut first).await;
    push(&mut first, "session-message", json!({"sessionId": "s1"})).await;
    wait_until(|| client.is_processing("s1")).await;

    first.close(None).await.unwrap();
    drop(first);

    let mut second = timeout(TIMEOUT, accepted.recv()).await.unwrap().unwrap();
    assert!(!client.is_processing("s1"));
    let auth = next_json(&mut second).await;
    assert_eq!(auth["event"], "auth");
    wait_until(|| client.connection_id().is_some_and(|id| id.as_str() == "srv-2")).await;

    push(
        &mut second,
        "sync-full",
        json!({"processingSessions": ["s2"], "agentStatus": "online"}),
    )
    .await;
    wait_until(|| client.is_processing("s2")).await;
    assert!(!client.is_processing("s1"));

    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_socket() {
    let (url, mut accepted) = boot_server().await;
    let client = client();
    let _ = client.start(config(&url, Some("tok"))).await;

    let mut ws = timeout(TIMEOUT, accepted.recv()).await.unwrap().unwrap();
    let _ = next_json(&mut ws).await;
    wait_until(|| client.is_connected()).await;

    client.shutdown().await;
    let end = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
}
