//! Pixel conversion into the software canvas format (`0x00RRGGBB`).

use crate::format::PixelLayout;

/// Convert one packed pixel to XRGB.
///
/// `px` must hold at least `layout.bytes_per_pixel()` bytes. Planar
/// layouts are handled by [`yuv_to_xrgb`].
pub(crate) fn packed_to_xrgb(layout: PixelLayout, px: &[u8]) -> u32 {
    match layout {
        PixelLayout::Argb8888 => u32::from_le_bytes([px[0], px[1], px[2], px[3]]) & 0x00FF_FFFF,
        PixelLayout::Rgb24 => (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32,
        PixelLayout::Argb2101010 => argb2101010_to_xrgb(u32::from_le_bytes([px[0], px[1], px[2], px[3]])),
        PixelLayout::Yv12 => yuv_to_xrgb(px[0], 128, 128),
    }
}

/// Drop the two low bits of each 10-bit channel.
pub fn argb2101010_to_xrgb(word: u32) -> u32 {
    let r = (word >> 20) & 0x3FF;
    let g = (word >> 10) & 0x3FF;
    let b = word & 0x3FF;
    (r >> 2) << 16 | (g >> 2) << 8 | (b >> 2)
}

/// BT.601 limited-range YCbCr to XRGB.
pub fn yuv_to_xrgb(y: u8, u: u8, v: u8) -> u32 {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u32;
    let r = clamp((298 * c + 409 * e + 128) >> 8);
    let g = clamp((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp((298 * c + 516 * d + 128) >> 8);

    r << 16 | g << 8 | b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layouts() {
        assert_eq!(packed_to_xrgb(PixelLayout::Rgb24, &[0x12, 0x34, 0x56]), 0x123456);
        // little-endian 0xFF123456
        assert_eq!(packed_to_xrgb(PixelLayout::Argb8888, &[0x56, 0x34, 0x12, 0xFF]), 0x123456);
    }

    #[test]
    fn ten_bit_white_and_black() {
        assert_eq!(argb2101010_to_xrgb(0xFFFF_FFFF), 0xFFFFFF);
        assert_eq!(argb2101010_to_xrgb(0xC000_0000), 0);
    }

    #[test]
    fn yuv_extremes() {
        assert_eq!(yuv_to_xrgb(16, 128, 128), 0x000000);
        assert_eq!(yuv_to_xrgb(235, 128, 128), 0xFFFFFF);
    }
}
