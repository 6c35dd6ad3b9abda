//! Fixed-size frame header for the RPC transport.
//!
//! ```text
//! offset  size  field
//!      0     4  magic     "GDR1"
//!      4     4  checksum  first 4 bytes of blake3(payload), LE; 0 if empty
//!      8     1  kind      FrameKind
//!      9     3  reserved  zero
//!     12     8  call_id   LE
//!     20     4  length    payload length, LE
//! ```

use crate::error::{GatewayError, Result};

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"GDR1";

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 24;

pub type HeaderBytes = [u8; HEADER_SIZE];

// ── FrameKind ────────────────────────────────────────────────────

/// What a frame means for its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Opens a call; payload is a `CallRequest`.
    Call = 1,
    /// One streamed message in either direction.
    Message = 2,
    /// The client has no more messages for this call.
    HalfClose = 3,
    /// The client abandons the call.
    Cancel = 4,
    /// Terminal status; payload is a `Status`.
    Status = 5,
}

impl TryFrom<u8> for FrameKind {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameKind::Call),
            2 => Ok(FrameKind::Message),
            3 => Ok(FrameKind::HalfClose),
            4 => Ok(FrameKind::Cancel),
            5 => Ok(FrameKind::Status),
            _ => Err(GatewayError::InvalidFrame("unknown frame kind")),
        }
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub checksum: u32,
    pub kind: FrameKind,
    pub call_id: u64,
    pub length: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> HeaderBytes {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[8] = self.kind as u8;
        bytes[12..20].copy_from_slice(&self.call_id.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &HeaderBytes) -> Result<Self> {
        if bytes[0..4] != MAGIC {
            return Err(GatewayError::InvalidFrame("bad magic"));
        }
        Ok(Self {
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            kind: FrameKind::try_from(bytes[8])?,
            call_id: u64::from_le_bytes([
                bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18],
                bytes[19],
            ]),
            length: u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
        })
    }
}

/// Payload checksum as carried in the header.
pub fn checksum(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        return 0;
    }
    let hash = blake3::hash(payload);
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
