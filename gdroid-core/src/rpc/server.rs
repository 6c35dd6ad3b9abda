//! Framed-TCP RPC server.
//!
//! Each accepted connection gets a writer task (outbound frames from all
//! of its calls, in send order) and a dispatcher loop that routes inbound
//! frames to calls tracked in a [`CallPool`]. When the connection drops,
//! every call still in flight is cancelled. A `Call` frame reusing the id
//! of a call still in flight is a protocol error and closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::protocol::CallRequest;
use crate::registry::ServiceRegistry;
use crate::rpc::calls::CallPool;
use crate::rpc::codec::GatewayCodec;
use crate::rpc::header::FrameKind;
use crate::rpc::packet::Frame;
use crate::rpc::service::{CallContext, Inbound, ResponseSink, Status};

/// Outbound frames buffered per connection.
const OUTBOUND_DEPTH: usize = 256;

pub struct RpcServer {
    registry: Arc<ServiceRegistry>,
}

impl RpcServer {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        info!("RPC server listening on {local}");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("RPC server on {local} shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let registry = Arc::clone(&self.registry);
                            let token = shutdown.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, peer, registry, token).await {
                                    warn!("connection {peer} ended with error: {e}");
                                }
                            });
                        }
                        Err(e) => warn!("accept error: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Serve one connection until the peer disconnects or `token` fires.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ServiceRegistry>,
    token: CancellationToken,
) -> Result<()> {
    debug!("connection from {peer}");
    let _ = stream.set_nodelay(true);
    let (mut net_writer, mut net_reader) = Framed::new(stream, GatewayCodec).split();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = net_writer.send(frame).await {
                warn!("write error: {e}");
                break;
            }
        }
        let _ = net_writer.close().await;
    });

    let mut calls = CallPool::new(token.clone());
    let result = loop {
        tokio::select! {
            _ = token.cancelled() => break Ok(()),
            Some(event) = calls.recv() => calls.process_event(event),
            frame = net_reader.next() => match frame {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(frame)) => {
                    if let Err(e) = dispatch(frame, &registry, &mut calls, &out_tx).await {
                        break Err(e);
                    }
                }
            },
        }
    };

    calls.shutdown().await;
    drop(out_tx);
    let _ = writer.await;
    debug!("connection from {peer} closed");
    result
}

async fn dispatch(
    frame: Frame,
    registry: &Arc<ServiceRegistry>,
    calls: &mut CallPool,
    out_tx: &mpsc::Sender<Frame>,
) -> Result<()> {
    let call_id = frame.call_id();
    match frame.kind() {
        FrameKind::Call => {
            let request = match CallRequest::from_bytes(frame.payload()) {
                Ok(r) => r,
                Err(e) => {
                    reject(out_tx, call_id, &e).await;
                    return Ok(());
                }
            };
            if calls.contains(call_id) {
                return Err(GatewayError::protocol(format!("duplicate call id {call_id}")));
            }
            let registry = Arc::clone(registry);
            let sink = ResponseSink::new(call_id, out_tx.clone());
            let spawned = calls.spawn(call_id, move |inbound, cancel| {
                run_call(registry, call_id, request, Inbound::new(inbound), sink, cancel)
            });
            if let Err(e) = spawned {
                reject(out_tx, call_id, &e).await;
            }
        }
        FrameKind::Message => calls.feed(call_id, frame.into_payload()).await,
        FrameKind::HalfClose => calls.half_close(call_id),
        FrameKind::Cancel => calls.cancel(call_id),
        FrameKind::Status => warn!(call_id, "client sent a status frame; ignored"),
    }
    Ok(())
}

async fn run_call(
    registry: Arc<ServiceRegistry>,
    call_id: u64,
    request: CallRequest,
    inbound: Inbound,
    sink: ResponseSink,
    cancel: CancellationToken,
) {
    let CallRequest {
        service: service_name,
        method,
        request,
    } = request;
    debug!(call_id, "call {service_name}.{method}");

    let status_sink = sink.clone();
    let mut ctx = CallContext::new(
        call_id,
        service_name.as_str(),
        method.as_str(),
        request,
        inbound,
        sink,
        cancel.clone(),
    );

    let result = match registry.lookup(&service_name) {
        Err(e) => Err(e),
        Ok(service) if service.method(&method).is_none() => Err(ctx.unknown_method()),
        Ok(service) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GatewayError::Cancelled),
                r = service.call(&mut ctx) => r,
            }
        }
    };
    // Releases the call's inbound receiver and any borrowed resources.
    drop(ctx);

    if let Err(e) = &result {
        debug!(call_id, "call {service_name}.{method} failed: {e}");
    }
    if status_sink.finish(&Status::from_result(&result)).await.is_err() {
        debug!(call_id, "connection gone before status could be sent");
    }
}

async fn reject(out_tx: &mpsc::Sender<Frame>, call_id: u64, error: &GatewayError) {
    warn!(call_id, "rejecting call: {error}");
    let status = Status::internal(error.to_string());
    if let Ok(frame) = Frame::status(call_id, &status) {
        let _ = out_tx.send(frame).await;
    }
}
