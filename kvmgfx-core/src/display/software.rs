//! CPU display backend.
//!
//! Textures are kept in their native layout and converted while being
//! composited onto an XRGB canvas sized to the window. Every
//! [`present`](DisplayBackend::present) publishes the canvas through a
//! `tokio::sync::watch` channel so a viewer (or a test) can read the
//! latest frame without blocking the render loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use super::convert::{packed_to_xrgb, yuv_to_xrgb};
use super::{DisplayBackend, Plane, TextureId};
use crate::error::KvmError;
use crate::format::PixelLayout;

// ── PresentedFrame / FrameStats ──────────────────────────────────

/// A composited frame as it appeared on the window.
#[derive(Debug, Clone, Default)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    /// `width * height` pixels, `0x00RRGGBB`.
    pub pixels: Vec<u32>,
    /// Monotonic present counter, starting at 1.
    pub sequence: u64,
}

/// Present statistics exposed to the UI.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Current smoothed frames per second.
    pub fps: f64,
    /// Total frames presented since start.
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
}

// ── Texture ──────────────────────────────────────────────────────

#[derive(Debug)]
struct YuvPlanes {
    y: Vec<u8>,
    y_pitch: usize,
    u: Vec<u8>,
    u_pitch: usize,
    v: Vec<u8>,
    v_pitch: usize,
}

#[derive(Debug)]
struct Texture {
    layout: PixelLayout,
    width: u32,
    height: u32,
    /// Packed contents, `pitch` bytes per row.
    data: Vec<u8>,
    pitch: usize,
    planes: Option<YuvPlanes>,
}

impl Texture {
    fn sample(&self, x: usize, y: usize) -> u32 {
        if let Some(p) = &self.planes {
            let luma = p.y.get(y * p.y_pitch + x).copied().unwrap_or(16);
            let u = p.u.get((y / 2) * p.u_pitch + x / 2).copied().unwrap_or(128);
            let v = p.v.get((y / 2) * p.v_pitch + x / 2).copied().unwrap_or(128);
            return yuv_to_xrgb(luma, u, v);
        }

        let bpp = self.layout.bytes_per_pixel();
        let at = y * self.pitch + x * bpp;
        match self.data.get(at..at + bpp) {
            Some(px) => packed_to_xrgb(self.layout, px),
            None => 0,
        }
    }
}

// ── SoftwareDisplay ──────────────────────────────────────────────

/// A window composited in memory.
pub struct SoftwareDisplay {
    title: String,
    window_width: u32,
    window_height: u32,
    centered: bool,
    cursor_hidden: bool,
    canvas: Vec<u32>,
    xor_blend: bool,
    textures: HashMap<TextureId, Texture>,
    next_texture: u32,
    textures_created: u64,
    frame_tx: watch::Sender<Arc<PresentedFrame>>,
    frame_rx: watch::Receiver<Arc<PresentedFrame>>,
    stats_tx: watch::Sender<FrameStats>,
    stats_rx: watch::Receiver<FrameStats>,
    fps_samples: VecDeque<Duration>,
    last_present: Option<Instant>,
    total_frames: u64,
}

impl SoftwareDisplay {
    /// Create a window of the given initial size.
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        let (frame_tx, frame_rx) = watch::channel(Arc::new(PresentedFrame::default()));
        let (stats_tx, stats_rx) = watch::channel(FrameStats::default());
        Self {
            title: title.into(),
            window_width: width,
            window_height: height,
            centered: true,
            cursor_hidden: false,
            canvas: vec![0; width as usize * height as usize],
            xor_blend: false,
            textures: HashMap::new(),
            next_texture: 1,
            textures_created: 0,
            frame_tx,
            frame_rx,
            stats_tx,
            stats_rx,
            fps_samples: VecDeque::with_capacity(64),
            last_present: None,
            total_frames: 0,
        }
    }

    /// Obtain a receiver that yields every presented frame.
    pub fn frame_receiver(&self) -> watch::Receiver<Arc<PresentedFrame>> {
        self.frame_rx.clone()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<FrameStats> {
        self.stats_rx.clone()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn is_centered(&self) -> bool {
        self.centered
    }

    pub fn is_cursor_hidden(&self) -> bool {
        self.cursor_hidden
    }

    pub fn xor_blend(&self) -> bool {
        self.xor_blend
    }

    /// Number of textures allocated over the display's lifetime.
    pub fn textures_created(&self) -> u64 {
        self.textures_created
    }

    /// Number of textures currently alive.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Dimensions and layout of a live texture.
    pub fn texture_info(&self, texture: TextureId) -> Option<(PixelLayout, u32, u32)> {
        self.textures.get(&texture).map(|t| (t.layout, t.width, t.height))
    }

    /// Packed contents of a live texture.
    pub fn texture_data(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.data.as_slice())
    }

    pub fn canvas(&self) -> &[u32] {
        &self.canvas
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn texture_mut(&mut self, texture: TextureId) -> Result<&mut Texture, KvmError> {
        self.textures.get_mut(&texture).ok_or(KvmError::UnknownTexture(texture))
    }
}

impl DisplayBackend for SoftwareDisplay {
    fn set_window_size(&mut self, width: u32, height: u32) -> Result<(), KvmError> {
        self.window_width = width;
        self.window_height = height;
        self.canvas = vec![0; width as usize * height as usize];
        self.centered = false;
        Ok(())
    }

    fn center_window(&mut self) -> Result<(), KvmError> {
        self.centered = true;
        Ok(())
    }

    fn hide_cursor(&mut self) -> Result<(), KvmError> {
        self.cursor_hidden = true;
        Ok(())
    }

    fn create_texture(&mut self, layout: PixelLayout, width: u32, height: u32) -> Result<TextureId, KvmError> {
        if width == 0 || height == 0 {
            return Err(KvmError::Display(format!("invalid texture size {width}x{height}")));
        }

        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures_created += 1;

        let pitch = width as usize * layout.bytes_per_pixel();
        self.textures.insert(
            id,
            Texture {
                layout,
                width,
                height,
                data: vec![0; pitch * height as usize],
                pitch,
                planes: None,
            },
        );
        debug!("created {layout:?} texture {id:?} ({width}x{height})");
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn update_texture(&mut self, texture: TextureId, pixels: &[u8], pitch: usize) -> Result<(), KvmError> {
        let tex = self.texture_mut(texture)?;
        if tex.layout.is_planar() {
            return Err(KvmError::Display("packed update on a planar texture".into()));
        }
        let needed = pitch * tex.height as usize;
        if pixels.len() < needed {
            return Err(KvmError::PayloadOutOfBounds {
                needed,
                available: pixels.len(),
            });
        }
        tex.data.clear();
        tex.data.extend_from_slice(&pixels[..needed]);
        tex.pitch = pitch;
        Ok(())
    }

    fn update_yuv_texture(&mut self, texture: TextureId, y: Plane<'_>, u: Plane<'_>, v: Plane<'_>) -> Result<(), KvmError> {
        let tex = self.texture_mut(texture)?;
        if !tex.layout.is_planar() {
            return Err(KvmError::Display("planar update on a packed texture".into()));
        }
        tex.planes = Some(YuvPlanes {
            y: y.data.to_vec(),
            y_pitch: y.pitch,
            u: u.data.to_vec(),
            u_pitch: u.pitch,
            v: v.data.to_vec(),
            v_pitch: v.pitch,
        });
        Ok(())
    }

    fn lock_texture(&mut self, texture: TextureId, pitch: usize) -> Result<usize, KvmError> {
        let tex = self.texture_mut(texture)?;
        Ok(pitch * tex.height as usize)
    }

    fn unlock_texture(&mut self, texture: TextureId, pixels: &[u8], pitch: usize) -> Result<(), KvmError> {
        let tex = self.texture_mut(texture)?;
        tex.data.clear();
        tex.data.extend_from_slice(pixels);
        tex.pitch = pitch;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), KvmError> {
        self.canvas.fill(0);
        Ok(())
    }

    fn copy(&mut self, texture: TextureId) -> Result<(), KvmError> {
        let tex = self.textures.get(&texture).ok_or(KvmError::UnknownTexture(texture))?;
        let (ww, wh) = (self.window_width as usize, self.window_height as usize);
        let (tw, th) = (tex.width as usize, tex.height as usize);

        for wy in 0..wh {
            let ty = wy * th / wh;
            let row = &mut self.canvas[wy * ww..(wy + 1) * ww];
            for (wx, dst) in row.iter_mut().enumerate() {
                let px = tex.sample(wx * tw / ww, ty);
                *dst = if self.xor_blend { *dst ^ px } else { px };
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), KvmError> {
        self.total_frames += 1;

        let now = Instant::now();
        if let Some(last) = self.last_present {
            self.fps_samples.push_back(now.duration_since(last));
            if self.fps_samples.len() > 60 {
                self.fps_samples.pop_front();
            }
        }
        self.last_present = Some(now);

        let avg_secs = if self.fps_samples.is_empty() {
            0.0
        } else {
            self.fps_samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / self.fps_samples.len() as f64
        };
        let fps = if avg_secs > 0.0 { 1.0 / avg_secs } else { 0.0 };

        self.frame_tx.send_replace(Arc::new(PresentedFrame {
            width: self.window_width,
            height: self.window_height,
            pixels: self.canvas.clone(),
            sequence: self.total_frames,
        }));
        self.stats_tx.send_replace(FrameStats {
            fps,
            total_frames: self.total_frames,
            width: self.window_width,
            height: self.window_height,
        });
        Ok(())
    }

    fn set_xor_blend(&mut self, enabled: bool) {
        self.xor_blend = enabled;
    }
}

// ── Tests ────────────────────────────────────────────────────────
