//! Client side of the RPC transport.
//!
//! [`RpcClient`] owns a connection with a background writer and a
//! background reader; the reader routes each inbound frame to the call it
//! belongs to. Calls can run concurrently over one client.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::protocol::CallRequest;
use crate::rpc::codec::GatewayCodec;
use crate::rpc::header::FrameKind;
use crate::rpc::packet::Frame;
use crate::rpc::service::Status;
use crate::transfer::TransferReceiver;

type PendingCalls = Arc<Mutex<HashMap<u64, mpsc::Sender<Frame>>>>;

const CALL_DEPTH: usize = 64;

pub struct RpcClient {
    tx: mpsc::Sender<Frame>,
    pending: PendingCalls,
    next_call_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RpcClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, GatewayCodec).split();
        let (tx, mut out_rx) = mpsc::channel::<Frame>(CALL_DEPTH);
        let pending: PendingCalls = Arc::default();

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = net_writer.send(frame).await {
                    warn!("client write error: {e}");
                    break;
                }
            }
        });

        let routes = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("client read error: {e}");
                        break;
                    }
                };
                let call_id = frame.call_id();
                let terminal = frame.kind() == FrameKind::Status;
                let route = {
                    let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
                    if terminal {
                        routes.remove(&call_id)
                    } else {
                        routes.get(&call_id).cloned()
                    }
                };
                if let Some(route) = route {
                    let _ = route.send(frame).await;
                }
            }
            // Wake every waiting call with a closed channel.
            routes.lock().unwrap_or_else(PoisonError::into_inner).clear();
        });

        Self {
            tx,
            pending,
            next_call_id: AtomicU64::new(1),
            reader,
            writer,
        }
    }

    /// Open a call and return its id plus the stream of frames routed to it.
    pub async fn start_call(
        &self,
        service: &str,
        method: &str,
        request: Vec<u8>,
    ) -> Result<(u64, mpsc::Receiver<Frame>)> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (route_tx, route_rx) = mpsc::channel(CALL_DEPTH);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_id, route_tx);
        let frame = Frame::call(call_id, &CallRequest::new(service, method, request))?;
        self.tx.send(frame).await?;
        Ok((call_id, route_rx))
    }

    pub async fn send_message(&self, call_id: u64, message: impl Into<Bytes>) -> Result<()> {
        self.tx.send(Frame::message(call_id, message)?).await?;
        Ok(())
    }

    pub async fn half_close(&self, call_id: u64) -> Result<()> {
        self.tx.send(Frame::half_close(call_id)).await?;
        Ok(())
    }

    pub async fn cancel(&self, call_id: u64) -> Result<()> {
        self.tx.send(Frame::cancel(call_id)).await?;
        Ok(())
    }

    /// One request, one optional reply.
    pub async fn unary(&self, service: &str, method: &str, request: Vec<u8>) -> Result<Bytes> {
        let (_, rx) = self.start_call(service, method, request).await?;
        await_reply(rx).await
    }

    /// Stream `messages` to the server, then wait for its reply.
    pub async fn upload<I>(&self, service: &str, method: &str, messages: I) -> Result<Bytes>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let (call_id, rx) = self.start_call(service, method, Vec::new()).await?;
        for message in messages {
            self.send_message(call_id, message).await?;
        }
        self.half_close(call_id).await?;
        await_reply(rx).await
    }

    /// Server-streamed reply messages, ending at the call's status.
    pub async fn download(
        &self,
        service: &str,
        method: &str,
        request: Vec<u8>,
    ) -> Result<DownloadStream> {
        let (call_id, rx) = self.start_call(service, method, request).await?;
        Ok(DownloadStream {
            call_id,
            frames: ReceiverStream::new(rx),
            finished: false,
        })
    }

    /// Download a chunked transfer and reassemble its body.
    pub async fn download_transfer(
        &self,
        service: &str,
        method: &str,
        request: Vec<u8>,
    ) -> Result<Transfer> {
        let mut stream = self.download(service, method, request).await?;
        let mut receiver = TransferReceiver::new();
        let mut body = Vec::new();
        while let Some(message) = stream.next().await {
            let message = message?;
            if let Some(chunk) = receiver.accept(&message)? {
                body.extend_from_slice(chunk);
            }
        }
        let declared_length = receiver.declared_length();
        receiver.finish()?;
        Ok(Transfer {
            declared_length,
            body,
        })
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Result of [`RpcClient::download_transfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub declared_length: Option<u64>,
    pub body: Vec<u8>,
}

async fn await_reply(mut rx: mpsc::Receiver<Frame>) -> Result<Bytes> {
    let mut reply = Bytes::new();
    while let Some(frame) = rx.recv().await {
        match frame.kind() {
            FrameKind::Message => reply = frame.into_payload(),
            FrameKind::Status => {
                Status::from_bytes(frame.payload())?.into_result()?;
                return Ok(reply);
            }
            other => {
                return Err(GatewayError::protocol(format!(
                    "unexpected {other:?} frame from server"
                )));
            }
        }
    }
    Err(GatewayError::ChannelClosed)
}

// ── DownloadStream ───────────────────────────────────────────────

/// Reply messages of a server-streaming call. Yields an error and ends if
/// the call finishes with a non-OK status or the connection drops first.
pub struct DownloadStream {
    call_id: u64,
    frames: ReceiverStream<Frame>,
    finished: bool,
}

impl DownloadStream {
    pub fn call_id(&self) -> u64 {
        self.call_id
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let frame = match Pin::new(&mut self.frames).poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(frame) => frame,
        };
        let item = match frame {
            None => {
                self.finished = true;
                Some(Err(GatewayError::ChannelClosed))
            }
            Some(frame) => match frame.kind() {
                FrameKind::Message => Some(Ok(frame.into_payload())),
                FrameKind::Status => {
                    self.finished = true;
                    match Status::from_bytes(frame.payload()).and_then(Status::into_result) {
                        Ok(()) => None,
                        Err(e) => Some(Err(e)),
                    }
                }
                other => {
                    self.finished = true;
                    Some(Err(GatewayError::protocol(format!(
                        "unexpected {other:?} frame from server"
                    ))))
                }
            },
        };
        Poll::Ready(item)
    }
}
