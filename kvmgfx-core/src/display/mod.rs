//! Display backend seam.
//!
//! The render loop only needs a handful of primitives from whatever
//! draws the window: texture lifetime, full and planar uploads, a
//! streaming write buffer, clear/copy/present, and a logical-XOR blend
//! toggle. [`SoftwareDisplay`] implements them on the CPU.

mod convert;
mod software;

pub use convert::{argb2101010_to_xrgb, yuv_to_xrgb};
pub use software::{FrameStats, PresentedFrame, SoftwareDisplay};

use crate::error::KvmError;
use crate::format::PixelLayout;

/// Opaque handle to a backend texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// One plane of a planar upload.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Row pitch in bytes.
    pub pitch: usize,
}

/// Operations the frame presenter and negotiator need from the window.
pub trait DisplayBackend {
    /// Resize the window to the frame dimensions.
    fn set_window_size(&mut self, width: u32, height: u32) -> Result<(), KvmError>;

    /// Recenter the window on its screen.
    fn center_window(&mut self) -> Result<(), KvmError>;

    fn hide_cursor(&mut self) -> Result<(), KvmError>;

    /// Allocate a streaming texture.
    fn create_texture(&mut self, layout: PixelLayout, width: u32, height: u32) -> Result<TextureId, KvmError>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Replace a packed texture's contents with `pixels` rows of `pitch` bytes.
    fn update_texture(&mut self, texture: TextureId, pixels: &[u8], pitch: usize) -> Result<(), KvmError>;

    /// Replace a planar texture's contents.
    fn update_yuv_texture(&mut self, texture: TextureId, y: Plane<'_>, u: Plane<'_>, v: Plane<'_>) -> Result<(), KvmError>;

    /// Begin direct writes; returns the byte length of the write buffer
    /// for rows of `pitch` bytes.
    fn lock_texture(&mut self, texture: TextureId, pitch: usize) -> Result<usize, KvmError>;

    /// Finish direct writes, committing the written buffer.
    fn unlock_texture(&mut self, texture: TextureId, pixels: &[u8], pitch: usize) -> Result<(), KvmError>;

    fn clear(&mut self) -> Result<(), KvmError>;

    /// Composite a texture over the whole window.
    fn copy(&mut self, texture: TextureId) -> Result<(), KvmError>;

    fn present(&mut self) -> Result<(), KvmError>;

    /// Enable or disable logical-XOR blending for subsequent copies.
    fn set_xor_blend(&mut self, enabled: bool);
}
