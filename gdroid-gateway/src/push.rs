//! WebSocket push listener for live screen viewers.
//!
//! Each viewer gets a [`PushClient`] from the broadcast channel. The first
//! message it sees is the text handshake `OK`; every message after that is
//! one encoded frame as a binary message. Inbound messages are ignored
//! apart from `Close`.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gdroid_core::{BroadcastChannel, GatewayError, HANDSHAKE_ACK, PushMessage, Result};

pub struct PushServer {
    channel: BroadcastChannel,
}

impl PushServer {
    pub fn new(channel: BroadcastChannel) -> Self {
        Self { channel }
    }

    /// Accept viewers until `token` is cancelled.
    pub async fn serve(&self, listener: TcpListener, token: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("push listener on {addr}");
        }

        loop {
            let accept = tokio::select! {
                _ = token.cancelled() => break,
                result = listener.accept() => result,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("push accept error: {e}");
                    continue;
                }
            };

            let channel = self.channel.clone();
            let token = token.child_token();
            tokio::spawn(async move {
                if let Err(e) = serve_viewer(stream, peer, channel, token).await {
                    debug!("viewer {peer} ended: {e}");
                }
            });
        }

        info!("push listener stopped");
        Ok(())
    }
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> GatewayError {
    GatewayError::protocol(format!("websocket: {e}"))
}

/// Drive one viewer connection until it closes or the gateway stops.
pub async fn serve_viewer(
    stream: TcpStream,
    peer: SocketAddr,
    channel: BroadcastChannel,
    token: CancellationToken,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await.map_err(ws_error)?;
    let (mut outbound, mut inbound) = ws.split();

    // Dropping the client unregisters it, on every exit path.
    let mut client = channel.on_client_connect();
    info!("viewer {peer} connected as client {}", client.id());

    let result = loop {
        tokio::select! {
            _ = token.cancelled() => break Ok(()),
            message = client.recv() => {
                let message = match message {
                    Some(PushMessage::Ack) => Message::text(HANDSHAKE_ACK),
                    Some(PushMessage::Frame(frame)) => Message::binary(frame),
                    None => break Ok(()),
                };
                if let Err(e) = outbound.send(message).await {
                    break Err(ws_error(e));
                }
            }
            received = inbound.next() => match received {
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(ws_error(e)),
            },
        }
    };

    let _ = outbound.close().await;
    info!("viewer {peer} disconnected");
    result
}
