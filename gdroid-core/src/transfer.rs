//! Chunked bulk-transfer protocol (downloads / exports).
//!
//! # Wire format
//!
//! Every element below travels as its own response message:
//!
//! ```text
//! [mode]            1 byte   0xAA = length follows, 0xBB = no length
//! [length]          8 bytes  big-endian u64, only after 0xAA
//! [chunk] ...       ≤ 4096 bytes each, in source order, until EOF
//! ```
//!
//! [`TransferFramer`] produces the sequence from any `AsyncRead` source;
//! [`TransferReceiver`] consumes it on the other side. A transfer is never
//! resumed: any error aborts it and the caller restarts from scratch.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, Result};

/// Mode byte announcing that an 8-byte length field follows.
pub const MODE_DECLARED_LENGTH: u8 = 0xAA;

/// Mode byte announcing a body with no length field.
pub const MODE_UNDECLARED: u8 = 0xBB;

/// Maximum size of a single body chunk.
pub const BODY_CHUNK_SIZE: usize = 4096;

/// Size of the declared-length field.
pub const LENGTH_FIELD_SIZE: usize = 8;

// ── ChunkSink ────────────────────────────────────────────────────

/// Destination for outbound transfer messages.
#[async_trait]
pub trait ChunkSink: Send {
    /// Emit one message. An error aborts the transfer.
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()>;
}

#[async_trait]
impl ChunkSink for Vec<Bytes> {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.push(chunk);
        Ok(())
    }
}

// ── TransferPhase ────────────────────────────────────────────────

/// Phase of an outbound transfer.
///
/// ```text
/// EmitMode ──(declared)──► EmitLength ──► StreamBody ──(EOF)──► Done
///     └────(undeclared)──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    EmitMode,
    EmitLength,
    StreamBody,
    Done,
}

// ── TransferFramer ───────────────────────────────────────────────

/// Outbound side of the transfer protocol.
///
/// The framer owns its source. The source is dropped as soon as the
/// framer reaches [`TransferPhase::Done`], fails a read, or is itself
/// dropped (e.g. when the owning call is cancelled).
pub struct TransferFramer<R> {
    phase: TransferPhase,
    declared_length: Option<u64>,
    source: Option<R>,
    buffer: Vec<u8>,
    body_bytes: u64,
}

impl<R> TransferFramer<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a framer over `source` with no declared length.
    pub fn new(source: R) -> Self {
        Self {
            phase: TransferPhase::EmitMode,
            declared_length: None,
            source: Some(source),
            buffer: vec![0u8; BODY_CHUNK_SIZE],
            body_bytes: 0,
        }
    }

    /// Pre-declare the total length (switches the mode byte to `0xAA`).
    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Current phase.
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Body bytes emitted so far.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// Whether the underlying source is still held.
    pub fn holds_source(&self) -> bool {
        self.source.is_some()
    }

    /// Advance the state machine by one message.
    ///
    /// Returns the next message to emit, or `None` once the transfer is
    /// complete.
    pub async fn step(&mut self) -> Result<Option<Bytes>> {
        match self.phase {
            TransferPhase::EmitMode => {
                let (mode, next) = match self.declared_length {
                    Some(_) => (MODE_DECLARED_LENGTH, TransferPhase::EmitLength),
                    None => (MODE_UNDECLARED, TransferPhase::StreamBody),
                };
                self.phase = next;
                Ok(Some(Bytes::copy_from_slice(&[mode])))
            }
            TransferPhase::EmitLength => {
                let length = self
                    .declared_length
                    .ok_or_else(|| GatewayError::protocol("length phase without declared length"))?;
                self.phase = TransferPhase::StreamBody;
                Ok(Some(Bytes::copy_from_slice(&length.to_be_bytes())))
            }
            TransferPhase::StreamBody => {
                let Some(source) = self.source.as_mut() else {
                    self.finish();
                    return Ok(None);
                };
                let n = match source.read(&mut self.buffer).await {
                    Ok(n) => n,
                    Err(e) => {
                        self.finish();
                        return Err(e.into());
                    }
                };
                if n == 0 {
                    self.finish();
                    return Ok(None);
                }
                self.body_bytes += n as u64;
                Ok(Some(Bytes::copy_from_slice(&self.buffer[..n])))
            }
            TransferPhase::Done => Ok(None),
        }
    }

    /// Run the whole transfer into `sink`.
    ///
    /// Returns the number of body bytes streamed. On error the framer is
    /// dropped together with its source.
    pub async fn drive<S>(mut self, sink: &mut S) -> Result<u64>
    where
        S: ChunkSink + ?Sized,
    {
        while let Some(message) = self.step().await? {
            sink.send_chunk(message).await?;
        }
        Ok(self.body_bytes)
    }

    fn finish(&mut self) {
        self.phase = TransferPhase::Done;
        self.source = None;
    }
}

// ── TransferReceiver ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    AwaitMode,
    AwaitLength,
    Body,
}

/// Inbound side of the transfer protocol.
///
/// Feed every received message to [`accept`](Self::accept); body chunks
/// are handed back, header messages are consumed.
#[derive(Debug)]
pub struct TransferReceiver {
    state: ReceiverState,
    declared_length: Option<u64>,
    received: u64,
}

impl TransferReceiver {
    pub fn new() -> Self {
        Self {
            state: ReceiverState::AwaitMode,
            declared_length: None,
            received: 0,
        }
    }

    /// The length announced by the sender, once the header is read.
    pub fn declared_length(&self) -> Option<u64> {
        self.declared_length
    }

    /// Body bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Consume one message. Returns `Some(body)` for body chunks.
    pub fn accept<'a>(&mut self, message: &'a [u8]) -> Result<Option<&'a [u8]>> {
        match self.state {
            ReceiverState::AwaitMode => {
                match message {
                    [MODE_DECLARED_LENGTH] => self.state = ReceiverState::AwaitLength,
                    [MODE_UNDECLARED] => self.state = ReceiverState::Body,
                    [other] => {
                        return Err(GatewayError::protocol(format!(
                            "unknown transfer mode byte {other:#04x}"
                        )));
                    }
                    _ => {
                        return Err(GatewayError::protocol(format!(
                            "mode message must be 1 byte, got {}",
                            message.len()
                        )));
                    }
                }
                Ok(None)
            }
            ReceiverState::AwaitLength => {
                let field: [u8; LENGTH_FIELD_SIZE] = message.try_into().map_err(|_| {
                    GatewayError::protocol(format!(
                        "length message must be {LENGTH_FIELD_SIZE} bytes, got {}",
                        message.len()
                    ))
                })?;
                self.declared_length = Some(u64::from_be_bytes(field));
                self.state = ReceiverState::Body;
                Ok(None)
            }
            ReceiverState::Body => {
                if message.len() > BODY_CHUNK_SIZE {
                    return Err(GatewayError::protocol(format!(
                        "body chunk of {} bytes exceeds {BODY_CHUNK_SIZE}",
                        message.len()
                    )));
                }
                self.received += message.len() as u64;
                Ok(Some(message))
            }
        }
    }

    /// Validate the end of the stream and return the body size.
    pub fn finish(&self) -> Result<u64> {
        if self.state != ReceiverState::Body {
            return Err(GatewayError::protocol("transfer ended before the body started"));
        }
        if let Some(expected) = self.declared_length {
            if expected != self.received {
                return Err(GatewayError::protocol(format!(
                    "declared {expected} bytes, received {}",
                    self.received
                )));
            }
        }
        Ok(self.received)
    }
}

impl Default for TransferReceiver {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
