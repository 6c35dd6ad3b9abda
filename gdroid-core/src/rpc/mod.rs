//! RPC transport: the handler contract and its framed-TCP implementation.
//!
//! Submodules:
//! - [`header`] / [`packet`] / [`codec`]: wire format
//! - [`service`]: `Service`, `CallContext`, `Status`
//! - [`calls`]: per-connection in-flight call tracking
//! - [`server`] / [`client`]: connection loops

pub mod calls;
pub mod client;
pub mod codec;
pub mod header;
pub mod packet;
pub mod server;
pub mod service;

pub use calls::{CallEvent, CallPool};
pub use client::{DownloadStream, RpcClient, Transfer};
pub use codec::GatewayCodec;
pub use header::{FrameHeader, FrameKind, HEADER_SIZE};
pub use packet::{Frame, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use server::RpcServer;
pub use service::{
    CallContext, Inbound, MethodDescriptor, MethodKind, ResponseSink, Service, Status, StatusCode,
};
