//! Domain-specific error types for the KVMGFX receiver.
//!
//! All fallible operations return `Result<T, KvmError>`.
//! Conditions the pipeline treats as "not ready yet" (bad magic, an
//! unrecognised frame type) are not errors; they surface as `Option`
//! or enum outcomes and are retried on the next pass.

use std::time::Duration;
use thiserror::Error;

use crate::display::TextureId;

/// The canonical error type for the KVMGFX receiver.
#[derive(Debug, Error)]
pub enum KvmError {
    // ── Header / Format Errors ───────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The mapped region is too small to hold a frame header.
    #[error("region too short: expected at least {expected} bytes, got {actual}")]
    RegionTooShort { expected: usize, actual: usize },

    /// The advertised frame geometry cannot be displayed.
    #[error("unsupported geometry {width}x{height} (stride {stride})")]
    InvalidGeometry { width: u32, height: u32, stride: u32 },

    // ── Codec / Payload Errors ───────────────────────────────────
    /// The payload ends in the middle of a pixel or run record.
    #[error("truncated payload at source offset {offset}")]
    TruncatedPayload { offset: usize },

    /// The frame geometry asks for more bytes than the buffer holds.
    #[error("payload out of bounds: need {needed} bytes, have {available}")]
    PayloadOutOfBounds { needed: usize, available: usize },

    // ── Transport Errors ─────────────────────────────────────────
    /// The I/O layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The shared-memory transport failed or was disconnected.
    #[error("transport error: {0}")]
    Transport(String),

    /// An interrupt target is not (or no longer) known to the transport.
    #[error("unknown peer {peer} / vector {vector}")]
    UnknownPeer { peer: u16, vector: u16 },

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Remote Protocol Errors ───────────────────────────────────
    /// Encoding or decoding of a control message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A control frame violated the framing rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The remote session was closed by the peer.
    #[error("remote session closed")]
    RemoteClosed,

    // ── Display Errors ───────────────────────────────────────────
    /// A texture handle does not refer to a live texture.
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),

    /// The display backend rejected an operation.
    #[error("display error: {0}")]
    Display(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for KvmError {
    fn from(s: String) -> Self {
        KvmError::Other(s)
    }
}

impl From<&str> for KvmError {
    fn from(s: &str) -> Self {
        KvmError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for KvmError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        KvmError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for KvmError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        KvmError::Encoding(e.to_string())
    }
}

#[cfg(unix)]
impl From<nix::Error> for KvmError {
    fn from(e: nix::Error) -> Self {
        KvmError::Connection(std::io::Error::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = KvmError::InvalidGeometry {
            width: 0,
            height: 480,
            stride: 640,
        };
        assert_eq!(e.to_string(), "unsupported geometry 0x480 (stride 640)");

        let e = KvmError::PayloadOutOfBounds {
            needed: 1000,
            available: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_string() {
        let e: KvmError = "something broke".into();
        assert!(matches!(e, KvmError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: KvmError = io_err.into();
        assert!(matches!(e, KvmError::Connection(_)));
    }

    #[test]
    fn from_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        drop(rx);
        let e: KvmError = tx.send(1).unwrap_err().into();
        assert!(matches!(e, KvmError::ChannelClosed));
    }
}
