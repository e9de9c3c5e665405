//! Payload decompression.
//!
//! Both codecs work on opaque byte ranges: the caller computes how many
//! destination bytes a frame covers and the codec fills them from the
//! shared payload. Neither knows about width, height or stride.

mod rle;

pub use rle::{RLE_RUN_SIZE, RleRun, decode_black_rle};

use crate::error::KvmError;

/// Codec selected by the frame's compression type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Plain copy.
    None,
    /// Black run-length records interleaved with 24 bpp pixels.
    BlackRle,
}

impl Codec {
    /// Decode `len` destination bytes from `src` into `dst`.
    pub fn decode(self, dst: &mut [u8], src: &[u8], len: usize) -> Result<(), KvmError> {
        match self {
            Codec::None => decode_none(dst, src, len),
            Codec::BlackRle => decode_black_rle(dst, src, len),
        }
    }
}

/// Copy `len` bytes verbatim.
pub fn decode_none(dst: &mut [u8], src: &[u8], len: usize) -> Result<(), KvmError> {
    if src.len() < len {
        return Err(KvmError::PayloadOutOfBounds {
            needed: len,
            available: src.len(),
        });
    }
    if dst.len() < len {
        return Err(KvmError::PayloadOutOfBounds {
            needed: len,
            available: dst.len(),
        });
    }
    dst[..len].copy_from_slice(&src[..len]);
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
