use std::fmt::Debug;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{GatewayError, Result};
use crate::protocol::CallRequest;
use crate::rpc::header::{self, FrameHeader, FrameKind, HEADER_SIZE};
use crate::rpc::service::Status;

/// Largest payload a single frame may carry (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Largest encoded frame.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// One RPC transport frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    call_id: u64,
    payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, call_id: u64, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(GatewayError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            kind,
            call_id,
            payload,
        })
    }

    pub fn call(call_id: u64, request: &CallRequest) -> Result<Self> {
        Self::new(FrameKind::Call, call_id, request.to_bytes()?)
    }

    pub fn message(call_id: u64, payload: impl Into<Bytes>) -> Result<Self> {
        Self::new(FrameKind::Message, call_id, payload)
    }

    pub fn half_close(call_id: u64) -> Self {
        Self {
            kind: FrameKind::HalfClose,
            call_id,
            payload: Bytes::new(),
        }
    }

    pub fn cancel(call_id: u64) -> Self {
        Self {
            kind: FrameKind::Cancel,
            call_id,
            payload: Bytes::new(),
        }
    }

    pub fn status(call_id: u64, status: &Status) -> Result<Self> {
        Self::new(FrameKind::Status, call_id, status.to_bytes()?)
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            checksum: header::checksum(&self.payload),
            kind: self.kind,
            call_id: self.call_id,
            // Bounded by MAX_PAYLOAD_SIZE in every constructor.
            length: self.payload.len() as u32,
        }
    }

    /// Append the encoded frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_slice(&self.header().to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Build a frame from a decoded header and its payload, verifying the
    /// checksum.
    pub fn from_parts(header: FrameHeader, payload: Bytes) -> Result<Self> {
        if payload.len() != header.length as usize {
            return Err(GatewayError::InvalidFrame("payload length mismatch"));
        }
        if header::checksum(&payload) != header.checksum {
            return Err(GatewayError::InvalidFrame("checksum mismatch"));
        }
        Self::new(header.kind, header.call_id, payload)
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("call_id", &self.call_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_payload_rejected() {
        let err = Frame::message(1, vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { .. }));
        assert!(Frame::message(1, vec![0u8; MAX_PAYLOAD_SIZE]).is_ok());
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let frame = Frame::message(3, Bytes::from_static(b"hello")).unwrap();
        let header = frame.header();
        let err = Frame::from_parts(header, Bytes::from_static(b"hellp")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidFrame("checksum mismatch")));
    }

    #[test]
    fn control_frames_are_empty() {
        let frame = Frame::half_close(9);
        assert_eq!(frame.kind(), FrameKind::HalfClose);
        assert_eq!(frame.header().checksum, 0);
        assert_eq!(frame.header().length, 0);
    }
}
