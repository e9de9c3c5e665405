//! Black run-length decoding.
//!
//! ## Wire format
//!
//! The payload is a sequence of 3-byte pixel units. A unit of exactly
//! `0, 0, 0` is not a pixel but the start of a run record:
//!
//! ```text
//! marker: [u8; 3]  (0, 0, 0)
//! length: u16      pixels of black to skip
//! ```
//!
//! Runs are skipped, not written: the destination keeps whatever it held
//! for those pixels. A freshly allocated surface is zeroed, so the first
//! frame after a format change is correct; later frames rely on the guest
//! only emitting runs over pixels that are already black.

use bytes::Buf;

use crate::error::KvmError;

/// Encoded size of a run record.
pub const RLE_RUN_SIZE: usize = 5;

const PIXEL: usize = 3;

/// A decoded run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RleRun {
    /// Pixels covered by the run.
    pub length: u16,
}

impl RleRun {
    /// Read a run record from the cursor, checking the length first.
    fn read(src: &mut &[u8], offset: usize) -> Result<Self, KvmError> {
        if src.remaining() < RLE_RUN_SIZE {
            return Err(KvmError::TruncatedPayload { offset });
        }
        src.advance(PIXEL);
        Ok(Self {
            length: src.get_u16_le(),
        })
    }
}

/// Decode `len` destination bytes of black-RLE payload.
pub fn decode_black_rle(dst: &mut [u8], src: &[u8], len: usize) -> Result<(), KvmError> {
    let len = len.min(dst.len());
    let pixels = len / PIXEL;
    let total = src.len();
    let mut cursor = src;
    let mut i = 0usize;

    while i < pixels {
        let offset = total - cursor.remaining();
        if cursor.remaining() < PIXEL {
            return Err(KvmError::TruncatedPayload { offset });
        }

        if cursor[..PIXEL] == [0, 0, 0] {
            let run = RleRun::read(&mut cursor, offset)?;
            i += run.length as usize;
            continue;
        }

        let at = i * PIXEL;
        dst[at..at + PIXEL].copy_from_slice(&cursor[..PIXEL]);
        cursor.advance(PIXEL);
        i += 1;
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(length: u16) -> Vec<u8> {
        let mut rec = vec![0, 0, 0];
        rec.extend_from_slice(&length.to_le_bytes());
        rec
    }

    #[test]
    fn run_skips_without_writing() {
        // Stale content under the run must survive: runs never write.
        let mut src = run(4);
        src.extend_from_slice(&[10, 20, 30]);

        let mut dst = vec![0x55u8; 5 * 3];
        let len = dst.len();
        decode_black_rle(&mut dst, &src, len).unwrap();

        assert!(dst[..12].iter().all(|&b| b == 0x55));
        assert_eq!(&dst[12..15], &[10, 20, 30]);
    }

    #[test]
    fn run_on_zeroed_destination_reads_black() {
        let mut src = vec![1, 2, 3];
        src.extend(run(2));
        src.extend_from_slice(&[4, 5, 6]);

        let mut dst = vec![0u8; 4 * 3];
        decode_black_rle(&mut dst, &src, 4 * 3).unwrap();
        assert_eq!(dst, vec![1, 2, 3, 0, 0, 0, 0, 0, 0, 4, 5, 6]);
    }

    #[test]
    fn run_past_end_is_clamped() {
        let src = run(1000);
        let mut dst = vec![7u8; 6];
        decode_black_rle(&mut dst, &src, 6).unwrap();
        assert_eq!(dst, vec![7u8; 6]);
    }

    #[test]
    fn zero_length_run_consumes_record() {
        let mut src = run(0);
        src.extend_from_slice(&[9, 9, 9]);
        let mut dst = vec![0u8; 3];
        decode_black_rle(&mut dst, &src, 3).unwrap();
        assert_eq!(dst, vec![9, 9, 9]);
    }

    #[test]
    fn truncated_run_record() {
        let src = [1, 1, 1, 0, 0, 0, 4];
        let mut dst = vec![0u8; 9];
        let err = decode_black_rle(&mut dst, &src, 9).unwrap_err();
        assert!(matches!(err, KvmError::TruncatedPayload { offset: 3 }));
    }

    #[test]
    fn truncated_pixel() {
        let src = [1, 1, 1, 2, 2];
        let mut dst = vec![0u8; 6];
        let err = decode_black_rle(&mut dst, &src, 6).unwrap_err();
        assert!(matches!(err, KvmError::TruncatedPayload { offset: 3 }));
    }

    fn non_black_pixels() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            any::<[u8; 3]>().prop_filter("black pixel", |p| *p != [0, 0, 0]),
            0..256,
        )
        .prop_map(|px| px.concat())
    }

    proptest! {
        #[test]
        fn no_runs_is_plain_copy(data in non_black_pixels()) {
            let mut rle = vec![0u8; data.len()];
            let mut plain = vec![0u8; data.len()];
            decode_black_rle(&mut rle, &data, data.len()).unwrap();
            crate::codec::decode_none(&mut plain, &data, data.len()).unwrap();
            prop_assert_eq!(rle, plain);
        }

        #[test]
        fn run_advances_by_its_length(
            before in 0usize..8,
            length in 0u16..32,
            after in 1usize..8,
        ) {
            let mut src = vec![0x11u8; before * 3];
            src.extend(run(length));
            src.extend(vec![0x22u8; after * 3]);

            let pixels = before + length as usize + after;
            let mut dst = vec![0xEEu8; pixels * 3];
            decode_black_rle(&mut dst, &src, pixels * 3).unwrap();

            let run_start = before * 3;
            let run_end = run_start + length as usize * 3;
            prop_assert!(dst[..run_start].iter().all(|&b| b == 0x11));
            prop_assert!(dst[run_start..run_end].iter().all(|&b| b == 0xEE));
            prop_assert!(dst[run_end..].iter().all(|&b| b == 0x22));
        }
    }
}
