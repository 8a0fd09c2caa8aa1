//! WebSocket transport over `tokio-tungstenite`.
//!
//! Frames are JSON text messages. The auth frame is written immediately
//! after the handshake, and the server-assigned id is read from the
//! `x-connection-id` response header.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use relay_core::{ConnectionId, Frame, RelayError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{LinkEvent, LinkRequest, Transport, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Response header carrying the server-assigned connection id.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Production transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: &LinkRequest) -> relay_core::Result<TransportLink> {
        let endpoint = request.endpoint.as_str();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(RelayError::InvalidEndpoint {
                endpoint: endpoint.to_owned(),
                reason: "scheme must be ws or wss".into(),
            });
        }
        let client_request =
            endpoint
                .into_client_request()
                .map_err(|e| RelayError::InvalidEndpoint {
                    endpoint: endpoint.to_owned(),
                    reason: e.to_string(),
                })?;

        let (mut ws, response) =
            connect_async(client_request)
                .await
                .map_err(|e| RelayError::Connect {
                    endpoint: endpoint.to_owned(),
                    message: e.to_string(),
                })?;

        let id = response
            .headers()
            .get(CONNECTION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(ConnectionId::from);

        let auth = request.credential.auth_frame().encode()?;
        ws.send(Message::Text(auth.into()))
            .await
            .map_err(|e| RelayError::Handshake(e.to_string()))?;

        info!(endpoint, connection_id = ?id, "websocket link open");

        let buffer = request.outbound_buffer.max(1);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        drop(tokio::spawn(link_loop(ws, out_rx, in_tx)));

        Ok(TransportLink {
            id,
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Pump frames between the socket and the link channels until either side
/// goes away, then report exactly one [`LinkEvent::Closed`].
async fn link_loop(
    ws: WsStream,
    mut out_rx: mpsc::Receiver<Frame>,
    in_tx: mpsc::Sender<LinkEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let reason = loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break "closed by client".to_owned();
                };
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = %frame.event, error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    break e.to_string();
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match Frame::decode(text.as_str()) {
                        Ok(frame) => {
                            if in_tx.send(LinkEvent::Frame(frame)).await.is_err() {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break "receiver dropped".to_owned();
                            }
                        }
                        Err(e) => debug!(error = %e, "ignoring undecodable frame"),
                    },
                    Some(Ok(Message::Close(close))) => {
                        break close
                            .map(|c| c.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_owned());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_owned(),
                }
            }
        }
    };

    debug!(reason = %reason, "websocket link closed");
    let _ = in_tx.send(LinkEvent::Closed(reason)).await;
}
