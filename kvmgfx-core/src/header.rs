//! The frame header the guest writes at the start of the shared region.
//!
//! ## Wire format
//!
//! All fields are little-endian. The payload starts at [`HEADER_SIZE`].
//!
//! ```text
//! magic:      [u8; 16]  (0)   "[[KVMGFXHeader]]"
//! version:    u32       (16)  must be 2
//! guest_id:   u16       (20)
//! host_id:    u16       (22)  written by the host
//! frame_type: u32       (24)
//! comp_type:  u32       (28)
//! width:      u32       (32)
//! height:     u32       (36)
//! stride:     u32       (40)  row pitch in pixels
//! mouse_x:    i32       (44)
//! mouse_y:    i32       (48)
//! reserved:   [u8; 12]  (52)
//! ```

use crate::error::KvmError;

// ── Constants ────────────────────────────────────────────────────

/// Magic bytes identifying an initialised region.
pub const KVMGFX_MAGIC: [u8; 16] = *b"[[KVMGFXHeader]]";

/// The only protocol version this host accepts.
pub const KVMGFX_VERSION: u32 = 2;

/// Size of the header; the pixel payload follows immediately.
pub const HEADER_SIZE: usize = 64;

/// Byte offset of the `host_id` field.
pub const HOST_ID_OFFSET: usize = 22;

// ── FrameType ────────────────────────────────────────────────────

/// Pixel encoding of the frame the guest produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// No valid frame is present.
    Invalid,
    /// 32 bpp, A R G B.
    Argb,
    /// 24 bpp interleaved R G B.
    Rgb,
    /// 24 bpp delta to be XORed against the previous frame.
    Xor,
    /// Planar YUV 4:4:4.
    Yuv444p,
    /// Planar YUV 4:2:0, 12 bpp.
    Yuv420p,
    /// 32 bpp packed 2:10:10:10.
    Argb10,
}

impl FrameType {
    /// Map a raw header value, `None` when unrecognised.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FrameType::Invalid),
            1 => Some(FrameType::Argb),
            2 => Some(FrameType::Rgb),
            3 => Some(FrameType::Xor),
            4 => Some(FrameType::Yuv444p),
            5 => Some(FrameType::Yuv420p),
            6 => Some(FrameType::Argb10),
            _ => None,
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            FrameType::Invalid => 0,
            FrameType::Argb => 1,
            FrameType::Rgb => 2,
            FrameType::Xor => 3,
            FrameType::Yuv444p => 4,
            FrameType::Yuv420p => 5,
            FrameType::Argb10 => 6,
        }
    }
}

impl TryFrom<u32> for FrameType {
    type Error = KvmError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(KvmError::UnknownVariant {
            type_name: "FrameType",
            value: raw as u64,
        })
    }
}

// ── CompType ─────────────────────────────────────────────────────

/// Compression applied to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompType {
    /// Raw pixels.
    None,
    /// 24 bpp pixels with runs of black replaced by run records.
    BlackRle,
}

impl CompType {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CompType::None),
            1 => Some(CompType::BlackRle),
            _ => None,
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            CompType::None => 0,
            CompType::BlackRle => 1,
        }
    }
}

impl TryFrom<u32> for CompType {
    type Error = KvmError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(KvmError::UnknownVariant {
            type_name: "CompType",
            value: raw as u64,
        })
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

/// A snapshot of the guest-written header.
///
/// `frame_type` and `comp_type` are kept raw so that an unrecognised
/// value survives parsing; the negotiator decides what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: [u8; 16],
    pub version: u32,
    pub guest_id: u16,
    pub host_id: u16,
    pub frame_type: u32,
    pub comp_type: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub mouse_x: i32,
    pub mouse_y: i32,
}

impl FrameHeader {
    /// Copy the header out of the start of a mapped region.
    pub fn read(region: &[u8]) -> Result<Self, KvmError> {
        if region.len() < HEADER_SIZE {
            return Err(KvmError::RegionTooShort {
                expected: HEADER_SIZE,
                actual: region.len(),
            });
        }

        let u32_at = |at: usize| u32::from_le_bytes([region[at], region[at + 1], region[at + 2], region[at + 3]]);
        let u16_at = |at: usize| u16::from_le_bytes([region[at], region[at + 1]]);

        let mut magic = [0u8; 16];
        magic.copy_from_slice(&region[0..16]);

        Ok(Self {
            magic,
            version: u32_at(16),
            guest_id: u16_at(20),
            host_id: u16_at(HOST_ID_OFFSET),
            frame_type: u32_at(24),
            comp_type: u32_at(28),
            width: u32_at(32),
            height: u32_at(36),
            stride: u32_at(40),
            mouse_x: u32_at(44) as i32,
            mouse_y: u32_at(48) as i32,
        })
    }

    /// Serialize to the wire layout (used by guest-side tooling and tests).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..16].copy_from_slice(&self.magic);
        buf[16..20].copy_from_slice(&self.version.to_le_bytes());
        buf[20..22].copy_from_slice(&self.guest_id.to_le_bytes());
        buf[22..24].copy_from_slice(&self.host_id.to_le_bytes());
        buf[24..28].copy_from_slice(&self.frame_type.to_le_bytes());
        buf[28..32].copy_from_slice(&self.comp_type.to_le_bytes());
        buf[32..36].copy_from_slice(&self.width.to_le_bytes());
        buf[36..40].copy_from_slice(&self.height.to_le_bytes());
        buf[40..44].copy_from_slice(&self.stride.to_le_bytes());
        buf[44..48].copy_from_slice(&self.mouse_x.to_le_bytes());
        buf[48..52].copy_from_slice(&self.mouse_y.to_le_bytes());
        buf
    }

    /// A header for a valid region describing the given frame.
    pub fn new(frame_type: FrameType, comp_type: CompType, width: u32, height: u32, stride: u32) -> Self {
        Self {
            magic: KVMGFX_MAGIC,
            version: KVMGFX_VERSION,
            guest_id: 0,
            host_id: 0,
            frame_type: frame_type.to_raw(),
            comp_type: comp_type.to_raw(),
            width,
            height,
            stride,
            mouse_x: 0,
            mouse_y: 0,
        }
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == KVMGFX_MAGIC
    }

    /// Magic and version both check out; anything else means the guest
    /// has not finished initialising the region.
    pub fn is_ready(&self) -> bool {
        self.has_valid_magic() && self.version == KVMGFX_VERSION
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_raw(self.frame_type)
    }

    pub fn comp_type(&self) -> Option<CompType> {
        CompType::from_raw(self.comp_type)
    }

    /// Guest-reported absolute pointer position.
    pub fn cursor(&self) -> (i32, i32) {
        (self.mouse_x, self.mouse_y)
    }
}

/// The pixel payload that follows the header.
pub fn payload(region: &[u8]) -> &[u8] {
    region.get(HEADER_SIZE..).unwrap_or(&[])
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_read_preserves_fields() {
        let mut header = FrameHeader::new(FrameType::Rgb, CompType::BlackRle, 640, 480, 640);
        header.guest_id = 3;
        header.mouse_x = -12;
        header.mouse_y = 400;

        let bytes = header.encode();
        assert_eq!(&bytes[0..16], b"[[KVMGFXHeader]]");
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 2);

        let parsed = FrameHeader::read(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.cursor(), (-12, 400));
    }

    #[test]
    fn short_region_is_rejected() {
        let err = FrameHeader::read(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, KvmError::RegionTooShort { actual: 10, .. }));
    }

    #[test]
    fn readiness_requires_magic_and_version() {
        let mut header = FrameHeader::new(FrameType::Argb, CompType::None, 1, 1, 1);
        assert!(header.is_ready());

        header.version = 1;
        assert!(!header.is_ready());

        header.version = KVMGFX_VERSION;
        header.magic[0] = b'X';
        assert!(!header.is_ready());
    }

    #[test]
    fn unknown_discriminants() {
        assert_eq!(FrameType::from_raw(42), None);
        assert_eq!(CompType::from_raw(7), None);
        assert!(matches!(
            FrameType::try_from(42),
            Err(KvmError::UnknownVariant { type_name: "FrameType", value: 42 })
        ));
        assert_eq!(FrameType::try_from(6).unwrap(), FrameType::Argb10);
    }

    #[test]
    fn payload_follows_header() {
        let mut region = vec![0u8; HEADER_SIZE + 3];
        region[HEADER_SIZE..].copy_from_slice(&[1, 2, 3]);
        assert_eq!(payload(&region), &[1, 2, 3]);
        assert!(payload(&region[..10]).is_empty());
    }
}
