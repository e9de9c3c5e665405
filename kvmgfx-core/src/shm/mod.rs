//! Shared-memory transport seam and the frame channel built on it.
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `channel`  | Header gating and the wait / acknowledge handshake   |
//! | `ivshmem`  | ivshmem-server client: fd passing, eventfd doorbells |

pub mod channel;
#[cfg(unix)]
pub mod ivshmem;

pub use channel::{FrameWait, HeaderCursor, SharedFrameChannel};
#[cfg(unix)]
pub use ivshmem::IvshmemClient;

use crate::error::KvmError;

/// Outcome of waiting for a guest interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The guest signalled.
    Ready,
    /// Nothing arrived within the wait window.
    Timeout,
    /// The transport failed or was disconnected.
    Error,
}

/// Primitives consumed from the shared-memory transport.
///
/// Implementations are shared between the render loop (wait, kick,
/// mapping) and the transport pump, so every method takes `&self`.
pub trait ShmTransport: Send + Sync {
    /// The mapped region, `None` until the server has sent it.
    fn mapping(&self) -> Option<&[u8]>;

    /// This endpoint's peer ID.
    fn local_id(&self) -> u16;

    /// Block until the guest raises `vector`, the wait times out, or the
    /// transport fails.
    fn wait_for_interrupt(&self, vector: u16) -> WaitResult;

    /// Raise `vector` on peer `peer`.
    fn kick_interrupt(&self, peer: u16, vector: u16) -> Result<(), KvmError>;

    /// Process one control message. Blocks until one arrives.
    fn pump_messages(&self) -> Result<(), KvmError>;

    /// Close the transport, forcing blocked calls to return.
    fn disconnect(&self);
}
