//! Domain-specific error types for the gateway.
//!
//! All fallible operations return `Result<T, GatewayError>`. At the RPC
//! call boundary every variant collapses into a single
//! [`Status`](crate::rpc::Status) with code `Internal` and the error's
//! display text as the message.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Lookup Errors ────────────────────────────────────────────
    /// A file, package, service name or telemetry source does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    // ── I/O Errors ───────────────────────────────────────────────
    /// Create, delete, read or write failed at the OS level.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A chunk stream was malformed or terminated prematurely.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A transport frame failed header or checksum validation.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// The frame payload exceeds the codec limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Runtime Errors ───────────────────────────────────────────
    /// A bounded external call exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled (peer went away or sent Cancel).
    #[error("call cancelled")]
    Cancelled,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Configuration Errors ─────────────────────────────────────
    /// Startup wiring is inconsistent (e.g. a duplicate service name).
    #[error("configuration error: {0}")]
    Configuration(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Shorthand for a [`GatewayError::Protocol`] error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        GatewayError::Protocol(msg.into())
    }

    /// Shorthand for a [`GatewayError::NotFound`] error.
    pub fn not_found(what: impl Into<String>) -> Self {
        GatewayError::NotFound(what.into())
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GatewayError {
    fn from(s: String) -> Self {
        GatewayError::Other(s)
    }
}

impl From<&str> for GatewayError {
    fn from(s: &str) -> Self {
        GatewayError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for GatewayError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        GatewayError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Encoding(e.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GatewayError::not_found("/sdcard/missing.txt");
        assert!(e.to_string().contains("/sdcard/missing.txt"));

        let e = GatewayError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_string() {
        let e: GatewayError = "something broke".into();
        assert!(matches!(e, GatewayError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: GatewayError = io_err.into();
        assert!(matches!(e, GatewayError::Io(_)));
        assert!(e.to_string().contains("pipe broke"));
    }

    #[test]
    fn timeout_reports_duration() {
        let e = GatewayError::Timeout(Duration::from_millis(1500));
        assert!(e.to_string().contains("1.5s"));
    }
}
