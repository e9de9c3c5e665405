//! Frame format negotiation.
//!
//! The host caches the last header it configured the display path for.
//! Every frame the live header is compared against that cache; on a
//! mismatch the negotiator resolves a [`FormatPlan`] (pixel layout,
//! presenter and codec) or defers until the guest offers something it
//! recognises.

use crate::codec::Codec;
use crate::error::KvmError;
use crate::header::{CompType, FrameHeader, FrameType};
use crate::present::Presenter;

// ── PixelLayout ──────────────────────────────────────────────────

/// Concrete texture layout on the display side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// 32 bpp, little-endian `0xAARRGGBB` words.
    Argb8888,
    /// 24 bpp, bytes R G B.
    Rgb24,
    /// 32 bpp, little-endian `A2 R10 G10 B10` words.
    Argb2101010,
    /// Planar Y, V, U at 4:2:0.
    Yv12,
}

impl PixelLayout {
    /// Bytes per pixel in the (first) plane.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Argb8888 | PixelLayout::Argb2101010 => 4,
            PixelLayout::Rgb24 => 3,
            PixelLayout::Yv12 => 1,
        }
    }

    pub const fn is_planar(self) -> bool {
        matches!(self, PixelLayout::Yv12)
    }
}

// ── NegotiatedFormat ─────────────────────────────────────────────

/// The host-side copy of the last applied header fields.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedFormat {
    pub version: u32,
    pub frame_type: FrameType,
    pub comp_type: CompType,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl NegotiatedFormat {
    /// The state before any frame has been configured.
    pub const fn invalid() -> Self {
        Self {
            version: 1,
            frame_type: FrameType::Invalid,
            comp_type: CompType::None,
            width: 0,
            height: 0,
            stride: 0,
        }
    }

    /// Snapshot a live header. An unrecognised frame or compression type
    /// reads as `Invalid` so the result never compares equal to anything.
    pub fn from_header(header: &FrameHeader) -> Self {
        let (frame_type, comp_type) = match (header.frame_type(), header.comp_type()) {
            (Some(ft), Some(ct)) => (ft, ct),
            _ => (FrameType::Invalid, CompType::None),
        };
        Self {
            version: header.version,
            frame_type,
            comp_type,
            width: header.width,
            height: header.height,
            stride: header.stride,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.frame_type == FrameType::Invalid
    }

    /// Format equality.
    ///
    /// Two formats are the same only if neither is invalid and version,
    /// frame type, compression, width and height all match. `stride` is
    /// not compared: a stride-only change does not reconfigure.
    pub fn same_as(&self, other: &NegotiatedFormat) -> bool {
        !self.is_invalid()
            && !other.is_invalid()
            && self.version == other.version
            && self.frame_type == other.frame_type
            && self.comp_type == other.comp_type
            && self.width == other.width
            && self.height == other.height
    }

    /// Compare against a live header, treating unknown types as invalid.
    pub fn matches(&self, header: &FrameHeader) -> bool {
        self.same_as(&NegotiatedFormat::from_header(header))
    }
}

impl Default for NegotiatedFormat {
    fn default() -> Self {
        Self::invalid()
    }
}

// ── FormatPlan ───────────────────────────────────────────────────

/// Largest width, height or stride the host will allocate for.
pub const MAX_DIMENSION: u32 = 8192;

/// Everything the render loop needs to draw frames of one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPlan {
    pub layout: PixelLayout,
    pub presenter: Presenter,
    pub codec: Codec,
}

impl FormatPlan {
    /// Bytes of raw frame data `header` describes for this plan.
    pub fn frame_len(&self, header: &FrameHeader) -> usize {
        let height = header.height as usize;
        if self.layout.is_planar() {
            let pixels = header.width as usize * height;
            return pixels + 2 * (pixels / 4);
        }
        height * header.stride as usize * self.layout.bytes_per_pixel()
    }

    /// Reject geometry the host cannot allocate for or that can never
    /// fit in a payload region of `payload_len` bytes.
    ///
    /// Compressed payloads are only bounded by [`MAX_DIMENSION`]; raw
    /// and directly uploaded frames must fit the region.
    pub fn check_geometry(&self, header: &FrameHeader, payload_len: usize) -> Result<(), KvmError> {
        let FrameHeader {
            width, height, stride, ..
        } = *header;
        let in_range = |v: u32| (1..=MAX_DIMENSION).contains(&v);
        if !in_range(width) || !in_range(height) || stride < width || stride > MAX_DIMENSION {
            return Err(KvmError::InvalidGeometry { width, height, stride });
        }

        if self.codec == Codec::None || self.presenter.uploads_directly() {
            let needed = self.frame_len(header);
            if payload_len < needed {
                return Err(KvmError::PayloadOutOfBounds {
                    needed,
                    available: payload_len,
                });
            }
        }
        Ok(())
    }
}

/// Map a frame type onto its texture layout and presenter.
///
/// YUV 4:4:4 is uploaded as RGB24 until a planar 4:4:4 texture exists.
pub const fn layout_for(frame_type: FrameType) -> Option<(PixelLayout, Presenter)> {
    match frame_type {
        FrameType::Argb => Some((PixelLayout::Argb8888, Presenter::Argb)),
        FrameType::Rgb => Some((PixelLayout::Rgb24, Presenter::Rgb)),
        FrameType::Xor => Some((PixelLayout::Rgb24, Presenter::Xor)),
        FrameType::Yuv444p => Some((PixelLayout::Rgb24, Presenter::Yuv444p)),
        FrameType::Yuv420p => Some((PixelLayout::Yv12, Presenter::Yuv420p)),
        FrameType::Argb10 => Some((PixelLayout::Argb2101010, Presenter::Argb10)),
        FrameType::Invalid => None,
    }
}

/// Map a compression type onto its codec.
pub const fn codec_for(comp_type: CompType) -> Codec {
    match comp_type {
        CompType::None => Codec::None,
        CompType::BlackRle => Codec::BlackRle,
    }
}

/// Resolve the plan for a live header, `None` to defer this pass.
pub fn resolve(header: &FrameHeader) -> Option<FormatPlan> {
    let (layout, presenter) = layout_for(header.frame_type()?)?;
    let codec = codec_for(header.comp_type()?);
    Some(FormatPlan {
        layout,
        presenter,
        codec,
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn header(frame_type: FrameType, comp_type: CompType, w: u32, h: u32, stride: u32) -> FrameHeader {
        FrameHeader::new(frame_type, comp_type, w, h, stride)
    }

    #[test]
    fn initial_format_never_matches() {
        let cached = NegotiatedFormat::invalid();
        let live = header(FrameType::Rgb, CompType::None, 640, 480, 640);
        assert!(!cached.matches(&live));
    }

    #[test]
    fn invalid_pairs_are_never_same() {
        let a = NegotiatedFormat::invalid();
        let b = NegotiatedFormat::invalid();
        assert!(!a.same_as(&b));
    }

    #[test]
    fn stride_only_change_is_not_detected() {
        // Regression guard: stride is excluded from format equality, so a
        // guest that only changes its row pitch keeps the old surface.
        let a = NegotiatedFormat::from_header(&header(FrameType::Rgb, CompType::None, 640, 480, 640));
        let b = NegotiatedFormat::from_header(&header(FrameType::Rgb, CompType::None, 640, 480, 704));
        assert!(a.same_as(&b));
    }

    #[test]
    fn unknown_frame_type_reads_as_invalid() {
        let mut live = header(FrameType::Rgb, CompType::None, 8, 8, 8);
        live.frame_type = 99;
        let snap = NegotiatedFormat::from_header(&live);
        assert!(snap.is_invalid());
        assert!(!snap.same_as(&snap));
        assert_eq!(resolve(&live), None);
    }

    #[test]
    fn unknown_comp_type_defers() {
        let mut live = header(FrameType::Rgb, CompType::None, 8, 8, 8);
        live.comp_type = 5;
        assert!(NegotiatedFormat::from_header(&live).is_invalid());
        assert_eq!(resolve(&live), None);
    }

    #[test]
    fn zero_or_oversized_geometry_is_rejected() {
        let cases = [
            (0, 480, 640),
            (640, 0, 640),
            (MAX_DIMENSION + 1, 16, MAX_DIMENSION + 1),
            (16, MAX_DIMENSION + 1, 16),
            (640, 480, 320),
            (u32::MAX, u32::MAX, u32::MAX),
        ];
        for (w, h, s) in cases {
            let live = header(FrameType::Rgb, CompType::BlackRle, w, h, s);
            let plan = resolve(&live).unwrap();
            let err = plan.check_geometry(&live, usize::MAX).unwrap_err();
            assert!(matches!(err, KvmError::InvalidGeometry { .. }), "{w}x{h}/{s}");
        }
    }

    #[test]
    fn raw_frame_must_fit_region() {
        let live = header(FrameType::Argb, CompType::None, 4, 4, 8);
        let plan = resolve(&live).unwrap();
        assert_eq!(plan.frame_len(&live), 4 * 8 * 4);
        assert!(plan.check_geometry(&live, 128).is_ok());
        assert!(matches!(
            plan.check_geometry(&live, 127),
            Err(KvmError::PayloadOutOfBounds {
                needed: 128,
                available: 127
            })
        ));
    }

    #[test]
    fn compressed_frame_only_checks_dimensions() {
        let live = header(FrameType::Rgb, CompType::BlackRle, 1920, 1080, 1920);
        let plan = resolve(&live).unwrap();
        assert!(plan.check_geometry(&live, 5).is_ok());
    }

    #[test]
    fn uploaded_planes_ignore_compression() {
        let live = header(FrameType::Yuv420p, CompType::BlackRle, 4, 4, 4);
        let plan = resolve(&live).unwrap();
        assert_eq!(plan.frame_len(&live), 24);
        assert!(plan.check_geometry(&live, 23).is_err());
        assert!(plan.check_geometry(&live, 24).is_ok());
    }

    #[test]
    fn layout_table_is_exhaustive() {
        let expected = [
            (FrameType::Argb, PixelLayout::Argb8888, Presenter::Argb),
            (FrameType::Rgb, PixelLayout::Rgb24, Presenter::Rgb),
            (FrameType::Xor, PixelLayout::Rgb24, Presenter::Xor),
            (FrameType::Yuv444p, PixelLayout::Rgb24, Presenter::Yuv444p),
            (FrameType::Yuv420p, PixelLayout::Yv12, Presenter::Yuv420p),
            (FrameType::Argb10, PixelLayout::Argb2101010, Presenter::Argb10),
        ];
        for (ft, layout, presenter) in expected {
            assert_eq!(layout_for(ft), Some((layout, presenter)), "{ft:?}");
        }
        assert_eq!(layout_for(FrameType::Invalid), None);
    }

    fn valid_frame_type() -> impl Strategy<Value = FrameType> {
        prop_oneof![
            Just(FrameType::Argb),
            Just(FrameType::Rgb),
            Just(FrameType::Xor),
            Just(FrameType::Yuv444p),
            Just(FrameType::Yuv420p),
            Just(FrameType::Argb10),
        ]
    }

    fn comp_type() -> impl Strategy<Value = CompType> {
        prop_oneof![Just(CompType::None), Just(CompType::BlackRle)]
    }

    proptest! {
        #[test]
        fn identical_valid_formats_match_regardless_of_stride(
            ft in valid_frame_type(),
            ct in comp_type(),
            w in 1u32..4096,
            h in 1u32..4096,
            s1 in 0u32..8192,
            s2 in 0u32..8192,
        ) {
            let a = NegotiatedFormat::from_header(&header(ft, ct, w, h, s1));
            let b = NegotiatedFormat::from_header(&header(ft, ct, w, h, s2));
            prop_assert!(a.same_as(&b));
        }

        #[test]
        fn any_mismatched_field_breaks_equality(
            ft in valid_frame_type(),
            ct in comp_type(),
            w in 1u32..4096,
            h in 1u32..4096,
            field in 0usize..5,
        ) {
            let base = NegotiatedFormat::from_header(&header(ft, ct, w, h, w));
            let mut other = base;
            match field {
                0 => other.version += 1,
                1 => other.frame_type = if ft == FrameType::Argb { FrameType::Rgb } else { FrameType::Argb },
                2 => other.comp_type = if ct == CompType::None { CompType::BlackRle } else { CompType::None },
                3 => other.width += 1,
                _ => other.height += 1,
            }
            prop_assert!(!base.same_as(&other));
            prop_assert!(!other.same_as(&base));
        }
    }
}
