//! Frame presentation.
//!
//! One presenter per frame type hands the decoded payload to the
//! display backend, acknowledges the frame to the guest and presents.
//! The acknowledgement is sent as soon as the payload has been consumed
//! (decoded into the surface or uploaded), before compositing, so the
//! guest can start on the next frame while the backend presents.

use crate::codec::Codec;
use crate::display::{DisplayBackend, Plane, TextureId};
use crate::error::KvmError;
use crate::format::PixelLayout;
use crate::header::FrameHeader;

// ── DisplaySurface ───────────────────────────────────────────────

/// The texture for the current format plus its streaming write buffer.
///
/// The write buffer is resolved once per format and reused for every
/// frame, so pixels the codec skips keep their previous contents.
#[derive(Debug)]
pub struct DisplaySurface {
    texture: TextureId,
    layout: PixelLayout,
    width: u32,
    height: u32,
    pitch: usize,
    pixels: Vec<u8>,
}

impl DisplaySurface {
    /// Create the texture for `header` and resolve its write buffer.
    pub fn allocate<B: DisplayBackend + ?Sized>(
        backend: &mut B,
        layout: PixelLayout,
        header: &FrameHeader,
    ) -> Result<Self, KvmError> {
        let texture = backend.create_texture(layout, header.width, header.height)?;
        let pitch = header.stride as usize * layout.bytes_per_pixel();
        let len = match backend.lock_texture(texture, pitch) {
            Ok(len) => len,
            Err(e) => {
                backend.destroy_texture(texture);
                return Err(e);
            }
        };

        Ok(Self {
            texture,
            layout,
            width: header.width,
            height: header.height,
            pitch,
            pixels: vec![0; len],
        })
    }

    /// Destroy the backing texture.
    pub fn release<B: DisplayBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_texture(self.texture);
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The write buffer the codecs decode into.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

// ── Presenter ────────────────────────────────────────────────────

/// Presentation routine, one per frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presenter {
    Argb,
    Argb10,
    Rgb,
    Xor,
    Yuv444p,
    Yuv420p,
}

impl Presenter {
    /// True when the payload is uploaded as-is, bypassing the codec.
    pub const fn uploads_directly(self) -> bool {
        matches!(self, Presenter::Argb10 | Presenter::Yuv420p)
    }

    /// Present one frame.
    ///
    /// `ack` releases the shared buffer back to the guest and is called
    /// exactly once on success, after the payload has been consumed.
    pub fn present<B: DisplayBackend + ?Sized>(
        self,
        backend: &mut B,
        surface: &mut DisplaySurface,
        codec: Codec,
        header: &FrameHeader,
        payload: &[u8],
        ack: &mut dyn FnMut() -> Result<(), KvmError>,
    ) -> Result<(), KvmError> {
        let stride = header.stride as usize;
        let height = header.height as usize;

        match self {
            Presenter::Argb10 => {
                let pitch = stride * 4;
                backend.update_texture(surface.texture, payload, pitch)?;
                ack()?;
                backend.clear()?;
                backend.copy(surface.texture)?;
                backend.present()
            }
            Presenter::Yuv420p => {
                let pixels = header.width as usize * header.height as usize;
                let quarter = pixels / 4;
                let needed = pixels + 2 * quarter;
                if payload.len() < needed {
                    return Err(KvmError::PayloadOutOfBounds {
                        needed,
                        available: payload.len(),
                    });
                }
                backend.update_yuv_texture(
                    surface.texture,
                    Plane {
                        data: &payload[..pixels],
                        pitch: stride,
                    },
                    Plane {
                        data: &payload[pixels..pixels + quarter],
                        pitch: stride / 2,
                    },
                    Plane {
                        data: &payload[pixels + quarter..needed],
                        pitch: stride / 2,
                    },
                )?;
                ack()?;
                backend.clear()?;
                backend.copy(surface.texture)?;
                backend.present()
            }
            Presenter::Argb | Presenter::Rgb | Presenter::Yuv444p => {
                let len = height * stride * surface.layout.bytes_per_pixel();
                codec.decode(&mut surface.pixels, payload, len)?;
                ack()?;
                backend.unlock_texture(surface.texture, &surface.pixels, surface.pitch)?;
                backend.clear()?;
                backend.copy(surface.texture)?;
                backend.present()
            }
            Presenter::Xor => {
                let len = height * stride * 3;
                backend.set_xor_blend(true);
                let result = present_xor(backend, surface, codec, payload, len, ack);
                // next frame's delta starts from blank, drawn or not
                surface.pixels.fill(0);
                result
            }
        }
    }
}

fn present_xor<B: DisplayBackend + ?Sized>(
    backend: &mut B,
    surface: &mut DisplaySurface,
    codec: Codec,
    payload: &[u8],
    len: usize,
    ack: &mut dyn FnMut() -> Result<(), KvmError>,
) -> Result<(), KvmError> {
    codec.decode(&mut surface.pixels, payload, len)?;
    ack()?;
    backend.unlock_texture(surface.texture, &surface.pixels, surface.pitch)?;
    backend.copy(surface.texture)?;
    backend.present()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SoftwareDisplay;
    use crate::header::{CompType, FrameType};

    fn setup(frame_type: FrameType, layout: PixelLayout, w: u32, h: u32) -> (SoftwareDisplay, DisplaySurface, FrameHeader) {
        let header = FrameHeader::new(frame_type, CompType::None, w, h, w);
        let mut display = SoftwareDisplay::new("test", w, h);
        let surface = DisplaySurface::allocate(&mut display, layout, &header).unwrap();
        (display, surface, header)
    }

    #[test]
    fn rgb_decodes_acks_and_presents() {
        let (mut display, mut surface, header) = setup(FrameType::Rgb, PixelLayout::Rgb24, 2, 2);
        let payload = [0x80u8; 12];
        let mut acks = 0;

        Presenter::Rgb
            .present(&mut display, &mut surface, Codec::None, &header, &payload, &mut || -> Result<(), KvmError> {
                acks += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(acks, 1);
        assert_eq!(surface.pixels(), &payload);
        assert_eq!(display.total_frames(), 1);
        assert!(display.canvas().iter().all(|&p| p == 0x808080));
    }

    #[test]
    fn xor_clears_source_after_present() {
        let (mut display, mut surface, header) = setup(FrameType::Xor, PixelLayout::Rgb24, 1, 1);
        let mut ack = || -> Result<(), KvmError> { Ok(()) };

        Presenter::Xor
            .present(&mut display, &mut surface, Codec::None, &header, &[0x0F, 0xF0, 0xFF], &mut ack)
            .unwrap();
        assert!(display.xor_blend());
        assert!(surface.pixels().iter().all(|&b| b == 0));
        assert_eq!(display.canvas(), &[0x0FF0FF]);

        // The same delta again toggles back to black.
        Presenter::Xor
            .present(&mut display, &mut surface, Codec::None, &header, &[0x0F, 0xF0, 0xFF], &mut ack)
            .unwrap();
        assert_eq!(display.canvas(), &[0]);
    }

    #[test]
    fn failed_xor_frame_leaves_no_residue() {
        // A delta that fails to decode must not leak into the next one.
        let (mut display, mut surface, header) = setup(FrameType::Xor, PixelLayout::Rgb24, 2, 1);
        let mut acks = 0;
        let mut ack = || -> Result<(), KvmError> {
            acks += 1;
            Ok(())
        };

        let truncated = [1u8, 2, 3, 4, 5];
        let err = Presenter::Xor
            .present(&mut display, &mut surface, Codec::BlackRle, &header, &truncated, &mut ack)
            .unwrap_err();
        assert!(matches!(err, KvmError::TruncatedPayload { offset: 3 }));
        assert!(surface.pixels().iter().all(|&b| b == 0));

        // A two-pixel black run is an empty delta.
        let empty_delta = [0u8, 0, 0, 2, 0];
        Presenter::Xor
            .present(&mut display, &mut surface, Codec::BlackRle, &header, &empty_delta, &mut ack)
            .unwrap();
        assert_eq!(acks, 1);
        assert_eq!(display.canvas(), &[0, 0]);
    }

    #[test]
    fn argb10_uploads_directly() {
        let (mut display, mut surface, header) = setup(FrameType::Argb10, PixelLayout::Argb2101010, 1, 1);
        let word: u32 = 0x3FF << 20;
        let mut acks = 0;
        Presenter::Argb10
            .present(&mut display, &mut surface, Codec::None, &header, &word.to_le_bytes(), &mut || -> Result<(), KvmError> {
                acks += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(acks, 1);
        assert_eq!(display.canvas(), &[0xFF0000]);
        // upload path never touches the write buffer
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn yuv420_short_payload_is_rejected_before_ack() {
        let (mut display, mut surface, header) = setup(FrameType::Yuv420p, PixelLayout::Yv12, 4, 4);
        let mut acks = 0;
        let err = Presenter::Yuv420p
            .present(&mut display, &mut surface, Codec::None, &header, &[16u8; 10], &mut || -> Result<(), KvmError> {
                acks += 1;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, KvmError::PayloadOutOfBounds { needed: 24, available: 10 }));
        assert_eq!(acks, 0);
        assert_eq!(display.total_frames(), 0);
    }

    #[test]
    fn yuv420_presents_planes() {
        let (mut display, mut surface, header) = setup(FrameType::Yuv420p, PixelLayout::Yv12, 2, 2);
        let mut payload = vec![16u8; 4];
        payload.extend_from_slice(&[128, 128]);
        Presenter::Yuv420p
            .present(&mut display, &mut surface, Codec::None, &header, &payload, &mut || -> Result<(), KvmError> { Ok(()) })
            .unwrap();
        assert!(display.canvas().iter().all(|&p| p == 0));
        assert_eq!(display.total_frames(), 1);
    }

    #[test]
    fn widened_stride_overruns_surface() {
        // Stride is not part of format equality; a wider stride on the
        // same surface no longer fits the write buffer.
        let (mut display, mut surface, mut header) = setup(FrameType::Rgb, PixelLayout::Rgb24, 2, 2);
        header.stride = 4;
        let payload = [1u8; 24];
        let err = Presenter::Rgb
            .present(&mut display, &mut surface, Codec::None, &header, &payload, &mut || -> Result<(), KvmError> { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, KvmError::PayloadOutOfBounds { needed: 24, available: 12 }));
    }
}
