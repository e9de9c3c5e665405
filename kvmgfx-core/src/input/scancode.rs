//! USB HID keyboard usage → PS/2 scan code set 1.
//!
//! Extended keys carry their `0xE0` prefix in the upper byte
//! (`0xE01D` is Right Ctrl). A zero entry means "no mapping".

use tracing::warn;

/// HID usage of Scroll Lock, the default pointer-mode hotkey.
pub const SCROLL_LOCK: u32 = 0x47;

#[rustfmt::skip]
const USB_TO_PS2: [u32; 0x68] = [
    // 0x00..0x03: reserved / error roll-over
    0, 0, 0, 0,
    // 0x04..0x1D: A..Z
    0x1E, 0x30, 0x2E, 0x20, 0x12, 0x21, 0x22, 0x23, 0x17, 0x24, 0x25, 0x26, 0x32,
    0x31, 0x18, 0x19, 0x10, 0x13, 0x1F, 0x14, 0x16, 0x2F, 0x11, 0x2D, 0x15, 0x2C,
    // 0x1E..0x27: 1..9, 0
    0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B,
    // 0x28..0x38: Enter Esc Backspace Tab Space - = [ ] \ #~ ; ' ` , . /
    0x1C, 0x01, 0x0E, 0x0F, 0x39, 0x0C, 0x0D, 0x1A, 0x1B, 0x2B, 0x2B, 0x27, 0x28,
    0x29, 0x33, 0x34, 0x35,
    // 0x39: Caps Lock
    0x3A,
    // 0x3A..0x45: F1..F12
    0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x40, 0x41, 0x42, 0x43, 0x44, 0x57, 0x58,
    // 0x46..0x48: Print Screen, Scroll Lock, Pause
    0xE037, 0x46, 0xE11D45,
    // 0x49..0x52: Insert Home PgUp Delete End PgDn Right Left Down Up
    0xE052, 0xE047, 0xE049, 0xE053, 0xE04F, 0xE051, 0xE04D, 0xE04B, 0xE050, 0xE048,
    // 0x53..0x58: Num Lock, KP / * - + Enter
    0x45, 0xE035, 0x37, 0x4A, 0x4E, 0xE01C,
    // 0x59..0x63: KP 1..9, 0, .
    0x4F, 0x50, 0x51, 0x4B, 0x4C, 0x4D, 0x47, 0x48, 0x49, 0x52, 0x53,
    // 0x64..0x67: non-US \|, Application, Power, KP =
    0x56, 0xE05D, 0, 0x59,
];

/// 0xE0..0xE7: LCtrl LShift LAlt LGui RCtrl RShift RAlt RGui
const MODIFIERS: [u32; 8] = [0x1D, 0x2A, 0x38, 0xE05B, 0xE01D, 0x36, 0xE038, 0xE05C];

/// Table lookup without logging.
pub const fn ps2_code(usage: u32) -> Option<u32> {
    let code = if usage < USB_TO_PS2.len() as u32 {
        USB_TO_PS2[usage as usize]
    } else if usage >= 0xE0 && usage <= 0xE7 {
        MODIFIERS[(usage - 0xE0) as usize]
    } else {
        0
    };

    if code == 0 { None } else { Some(code) }
}

/// Map a HID usage to its wire scan code, warning when there is none.
pub fn map_scancode(usage: u32) -> Option<u32> {
    let code = ps2_code(usage);
    if code.is_none() {
        warn!("unable to map USB scan code {usage:#x}");
    }
    code
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits() {
        assert_eq!(ps2_code(0x04), Some(0x1E)); // A
        assert_eq!(ps2_code(0x1D), Some(0x2C)); // Z
        assert_eq!(ps2_code(0x1E), Some(0x02)); // 1
        assert_eq!(ps2_code(0x27), Some(0x0B)); // 0
    }

    #[test]
    fn extended_keys_keep_prefix() {
        assert_eq!(ps2_code(0x52), Some(0xE048)); // Up
        assert_eq!(ps2_code(0xE4), Some(0xE01D)); // Right Ctrl
        assert_eq!(ps2_code(0x58), Some(0xE01C)); // KP Enter
    }

    #[test]
    fn function_keys() {
        assert_eq!(ps2_code(0x3A), Some(0x3B)); // F1
        assert_eq!(ps2_code(0x44), Some(0x57)); // F11
        assert_eq!(ps2_code(0x45), Some(0x58)); // F12
    }

    #[test]
    fn scroll_lock_has_a_code() {
        assert_eq!(ps2_code(SCROLL_LOCK), Some(0x46));
    }

    #[test]
    fn unmapped_usages() {
        assert_eq!(map_scancode(0x00), None);
        assert_eq!(map_scancode(0x66), None);
        assert_eq!(map_scancode(0x68), None);
        assert_eq!(map_scancode(0xE8), None);
        assert_eq!(map_scancode(u32::MAX), None);
    }
}
