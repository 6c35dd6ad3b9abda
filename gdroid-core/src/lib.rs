//! # gdroid-core
//!
//! Core library for the gdroid device-control gateway.
//!
//! This crate contains:
//! - **Limiter**: `TokenBucket` / `FixedWindowLimiter` admission control
//! - **Transfer**: `TransferFramer` / `TransferReceiver` for the chunked
//!   byte-stream protocol (mode byte, optional length, body chunks)
//! - **Upload**: `UploadSession` state machine writing to a file or an
//!   install transaction
//! - **Registry**: `RegistryBuilder` / `ServiceRegistry` name → handler bindings
//! - **Broadcast**: `BroadcastChannel` best-effort frame fan-out
//! - **Pipeline**: `CapturePipeline` limiter → encoder → broadcast
//! - **RPC**: `Service` contract, framed-TCP `RpcServer` and `RpcClient`
//! - **Error**: `GatewayError`, a `thiserror`-based error hierarchy

pub mod broadcast;
pub mod error;
pub mod limiter;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod rpc;
pub mod task;
pub mod transfer;
pub mod upload;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use broadcast::{BroadcastChannel, HANDSHAKE_ACK, PushClient, PushMessage};
pub use error::{GatewayError, Result};
pub use limiter::{FixedWindowLimiter, Limiter, TokenBucket};
pub use pipeline::{CapturePipeline, FrameEncoder, FrameProducer, JpegFrameEncoder, RawFrame};
pub use registry::{RegistryBuilder, ServiceBinding, ServiceFactory, ServiceRegistry};
pub use rpc::{CallContext, MethodDescriptor, MethodKind, RpcClient, RpcServer, Service, Status};
pub use task::with_timeout;
pub use transfer::{ChunkSink, TransferFramer, TransferPhase, TransferReceiver};
pub use upload::{InstallBackend, InstallTransaction, UploadMode, UploadSession};
