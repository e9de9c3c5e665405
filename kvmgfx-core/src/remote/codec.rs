//! Control-stream framing.
//!
//! ```text
//! ┌─────┬──────────┬─────────────────────┐
//! │ tag │ len (LE) │ bincode payload     │
//! │ u8  │ u16      │ len bytes           │
//! └─────┴──────────┴─────────────────────┘
//! ```
//!
//! The tag names the message family, so a peer that is talking the
//! wrong direction (or another protocol) fails fast.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use super::message::ControlMessage;
use crate::error::KvmError;

/// Bytes before the payload.
pub const FRAME_HEADER_LEN: usize = 3;

/// Largest payload a frame can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Decodes `D` frames; encodes any [`ControlMessage`].
#[derive(Debug)]
pub struct ControlCodec<D> {
    _decodes: PhantomData<fn() -> D>,
}

impl<D> ControlCodec<D> {
    pub fn new() -> Self {
        Self {
            _decodes: PhantomData,
        }
    }
}

impl<D> Default for ControlCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ControlMessage + DeserializeOwned> Decoder for ControlCodec<D> {
    type Item = D;
    type Error = KvmError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let tag = src[0];
        if tag != D::TAG {
            return Err(KvmError::ProtocolViolation("unexpected control frame tag"));
        }
        let len = u16::from_le_bytes([src[1], src[2]]) as usize;
        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len);
        let message = bincode::deserialize(&payload)?;
        Ok(Some(message))
    }
}

impl<D, E: ControlMessage + Serialize> Encoder<E> for ControlCodec<D> {
    type Error = KvmError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&item)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(KvmError::PayloadOutOfBounds {
                needed: payload.len(),
                available: MAX_PAYLOAD_LEN,
            });
        }

        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u8(E::TAG);
        dst.put_u16_le(payload.len() as u16);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
