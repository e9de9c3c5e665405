//! # kvmgfx-core
//!
//! Host-side receiver for VGA-passthrough frames written by a guest into
//! shared memory, plus the input bridge back to the guest.
//!
//! This crate contains:
//! - **Header**: the 64-byte `FrameHeader` wire layout, `FrameType`, `CompType`
//! - **Shm**: the `ShmTransport` seam, `SharedFrameChannel` handshake and the
//!   ivshmem-server client
//! - **Format**: `NegotiatedFormat` change detection and `FormatPlan` dispatch
//! - **Codec**: `NONE` and `BLACK_RLE` payload decoders
//! - **Present**: `DisplaySurface` and the per-frame-type `Presenter`
//! - **Display**: the `DisplayBackend` seam and a CPU `SoftwareDisplay`
//! - **Input**: `InputForwarder` with its pointer-mode state machine
//! - **Remote**: framed TCP control client implementing `RemoteInput`
//! - **Render / Pipeline**: the render loop and context orchestration
//! - **Error**: `KvmError`, a `thiserror`-based error hierarchy

pub mod codec;
pub mod display;
pub mod error;
pub mod format;
pub mod header;
pub mod input;
pub mod pipeline;
pub mod present;
pub mod remote;
pub mod render;
pub mod shm;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::Codec;
pub use display::{DisplayBackend, FrameStats, PresentedFrame, SoftwareDisplay, TextureId};
pub use error::KvmError;
pub use format::{FormatPlan, NegotiatedFormat, PixelLayout};
pub use header::{CompType, FrameHeader, FrameType, HEADER_SIZE, KVMGFX_MAGIC, KVMGFX_VERSION};
pub use input::{
    ChannelInput, GuestCursor, InputEvent, InputForwarder, InputHandle, InputSource, PointerMode, RemoteInput,
};
pub use pipeline::Pipeline;
pub use present::{DisplaySurface, Presenter};
pub use remote::{RemoteClient, RemotePump, RemoteSender, RemoteSession};
pub use render::{FrameSignals, RenderLoop, Step};
pub use shm::{FrameWait, HeaderCursor, SharedFrameChannel, ShmTransport, WaitResult};

#[cfg(unix)]
pub use shm::IvshmemClient;
