//! Request/response payloads carried inside RPC messages.
//!
//! Every struct here is bincode-encoded. Method payloads are opaque to the
//! transport; handlers decode them with `from_bytes` and reply with
//! `to_bytes`.
//!
//! ```text
//! Client ──[Call: CallRequest{service, method, request}]──► Gateway
//! Client ──[Message: UploadChunk]──────────────────────────► Gateway  (client streaming)
//! Gateway ──[Message: raw transfer element]────────────────► Client   (server streaming)
//! Gateway ──[Status]───────────────────────────────────────► Client   (exactly once)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

macro_rules! bincode_payload {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// Serialize to bincode bytes.
                pub fn to_bytes(&self) -> Result<Vec<u8>> {
                    Ok(bincode::serialize(self)?)
                }

                /// Deserialize from bincode bytes.
                pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
                    Ok(bincode::deserialize(bytes)?)
                }
            }
        )+
    };
}

// ── Call envelope ────────────────────────────────────────────────

/// Opens a call: which handler, which method, and the unary request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRequest {
    pub service: String,
    pub method: String,
    pub request: Vec<u8>,
}

impl CallRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>, request: Vec<u8>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            request,
        }
    }
}

// ── Uploads ──────────────────────────────────────────────────────

/// One inbound upload message. Only the first chunk's `path` is honoured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadChunk {
    pub path: Option<String>,
    pub data: Vec<u8>,
}

impl UploadChunk {
    /// Leading chunk naming the destination.
    pub fn header(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            data: Vec::new(),
        }
    }

    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: None,
            data: data.into(),
        }
    }
}

// ── Filesystem requests ──────────────────────────────────────────

/// Single-path request (download, list-dir, create-file, delete-file, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathRequest {
    pub path: String,
}

impl PathRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Directory listing request. Hidden entries (leading `.`) are skipped
/// unless `include_hidden` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListDirRequest {
    pub path: String,
    pub include_hidden: bool,
}

/// Source/destination pair (move, rename, copy).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathPair {
    pub from: String,
    pub to: String,
}

impl PathPair {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Text write/append request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextRequest {
    pub path: String,
    pub text: String,
}

/// Text read reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextReply {
    pub text: String,
}

/// One directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    /// Seconds since the Unix epoch, 0 when unknown.
    pub modified: u64,
}

/// Directory listing reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirListing {
    pub entries: Vec<DirEntry>,
}

/// Generic acknowledgement for mutating operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationStatus {
    pub success: bool,
    pub message: String,
}

impl OperationStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Reply to a completed upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    pub path: Option<String>,
    pub bytes_written: u64,
}

/// Provider invocation carried over the RPC: JSON text in, JSON text out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonPayload {
    pub json: String,
}

impl JsonPayload {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            json: serde_json::to_string(value)?,
        })
    }

    /// Parsed JSON; an empty payload reads as `null`.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        if self.json.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&self.json)?)
    }
}

bincode_payload!(
    CallRequest,
    UploadChunk,
    PathRequest,
    ListDirRequest,
    PathPair,
    TextRequest,
    TextReply,
    DirListing,
    OperationStatus,
    UploadReceipt,
    JsonPayload,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_roundtrip() {
        let req = CallRequest::new("filesystem", "list-dir", PathRequest::new("/sdcard").to_bytes().unwrap());
        let decoded = CallRequest::from_bytes(&req.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.service, "filesystem");
        assert_eq!(PathRequest::from_bytes(&decoded.request).unwrap().path, "/sdcard");
    }

    #[test]
    fn header_chunk_has_path_and_no_data() {
        let chunk = UploadChunk::header("/tmp/a.bin");
        assert_eq!(chunk.path.as_deref(), Some("/tmp/a.bin"));
        assert!(chunk.data.is_empty());
        assert_eq!(UploadChunk::data(b"AB".to_vec()).path, None);
    }

    #[test]
    fn truncated_payload_is_encoding_error() {
        let bytes = PathPair::new("a", "b").to_bytes().unwrap();
        let err = PathPair::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, crate::GatewayError::Encoding(_)));
    }
}
