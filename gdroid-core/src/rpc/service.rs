//! The handler contract between the transport and capability services.
//!
//! A [`Service`] describes its methods and runs one call at a time per
//! [`CallContext`]. Handlers never build a terminal status themselves: the
//! dispatcher maps `Ok(())` to [`Status::ok`] and any error to
//! [`Status::internal`] and sends it exactly once after the handler
//! returns.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::rpc::packet::Frame;
use crate::transfer::ChunkSink;

// ── Method descriptors ───────────────────────────────────────────

/// Streaming shape of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// One request, at most one reply message.
    Unary,
    /// Many inbound messages, one reply.
    ClientStreaming,
    /// One request, many reply messages.
    ServerStreaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub kind: MethodKind,
}

impl MethodDescriptor {
    pub const fn unary(name: &'static str) -> Self {
        Self {
            name,
            kind: MethodKind::Unary,
        }
    }

    pub const fn client_streaming(name: &'static str) -> Self {
        Self {
            name,
            kind: MethodKind::ClientStreaming,
        }
    }

    pub const fn server_streaming(name: &'static str) -> Self {
        Self {
            name,
            kind: MethodKind::ServerStreaming,
        }
    }
}

// ── Service ──────────────────────────────────────────────────────

/// A named capability group reachable over the transport.
#[async_trait]
pub trait Service: Send + Sync {
    /// Methods this service answers.
    fn methods(&self) -> &'static [MethodDescriptor];

    /// Run one call. Reply messages go through `ctx.sink()`.
    async fn call(&self, ctx: &mut CallContext) -> Result<()>;

    /// Descriptor for `method`, if this service has it.
    fn method(&self, method: &str) -> Option<MethodDescriptor> {
        self.methods().iter().find(|m| m.name == method).copied()
    }
}

// ── Status ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Internal,
}

/// Terminal outcome of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Internal,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Collapse a handler result into a status.
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::internal(e.to_string()),
        }
    }

    /// Client side: turn a non-OK status back into an error.
    pub fn into_result(self) -> Result<()> {
        match self.code {
            StatusCode::Ok => Ok(()),
            StatusCode::Internal => Err(GatewayError::Other(self.message)),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// Client-streamed messages for one call. Ends when the client half-closes.
#[derive(Debug)]
pub struct Inbound {
    rx: Option<mpsc::Receiver<Bytes>>,
}

impl Inbound {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx: Some(rx) }
    }

    /// An already-finished stream.
    pub fn empty() -> Self {
        Self { rx: None }
    }

    pub async fn next(&mut self) -> Option<Bytes> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

// ── ResponseSink ─────────────────────────────────────────────────

/// Server-to-client message stream for one call.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    call_id: u64,
    tx: mpsc::Sender<Frame>,
    sent: u64,
}

impl ResponseSink {
    pub fn new(call_id: u64, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            call_id,
            tx,
            sent: 0,
        }
    }

    pub async fn send(&mut self, message: impl Into<Bytes>) -> Result<()> {
        let frame = Frame::message(self.call_id, message)?;
        self.tx.send(frame).await?;
        self.sent += 1;
        Ok(())
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub(crate) async fn finish(&self, status: &Status) -> Result<()> {
        let frame = Frame::status(self.call_id, status)?;
        self.tx.send(frame).await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for ResponseSink {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.send(chunk).await
    }
}

// ── CallContext ──────────────────────────────────────────────────

/// Everything a handler sees of one call.
pub struct CallContext {
    call_id: u64,
    service: String,
    method: String,
    request: Bytes,
    inbound: Inbound,
    sink: ResponseSink,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(
        call_id: u64,
        service: impl Into<String>,
        method: impl Into<String>,
        request: impl Into<Bytes>,
        inbound: Inbound,
        sink: ResponseSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            call_id,
            service: service.into(),
            method: method.into(),
            request: request.into(),
            inbound,
            sink,
            cancel,
        }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Unary request body.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub fn inbound(&mut self) -> &mut Inbound {
        &mut self.inbound
    }

    pub fn sink(&mut self) -> &mut ResponseSink {
        &mut self.sink
    }

    /// Send the single reply of a unary or client-streaming call.
    pub async fn reply(&mut self, message: impl Into<Bytes>) -> Result<()> {
        self.sink.send(message).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Error for a method this service does not implement.
    pub fn unknown_method(&self) -> GatewayError {
        GatewayError::not_found(format!("method {}.{}", self.service, self.method))
    }
}
