//! Local input capture and forwarding to the guest.
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `channel`   | Channel-backed [`InputSource`] fed by an `InputHandle` |
//! | `forwarder` | Event translation and the pointer-mode state machine |
//! | `scancode`  | USB HID usage → PS/2 set-1 scan code table           |
//!
//! The forwarder sits between two seams: an [`InputSource`] producing
//! local [`InputEvent`]s, and a [`RemoteInput`] accepting the remote
//! protocol's primitive calls.

pub mod channel;
pub mod forwarder;
pub mod scancode;

use std::sync::Arc;

pub use channel::{ChannelInput, InputHandle};
pub use forwarder::{InputForwarder, PointerState};
pub use scancode::{SCROLL_LOCK, map_scancode};

use crate::error::KvmError;

// ── Events ───────────────────────────────────────────────────────

/// A local input event.
///
/// Key codes are USB HID usage IDs (keyboard page); pointer coordinates
/// are window-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// The user asked to close the client.
    Quit,
    KeyDown { scancode: u32, repeat: bool },
    KeyUp { scancode: u32 },
    /// Vertical wheel movement, positive is away from the user.
    MouseWheel { y: i32 },
    MouseMotion { x: i32, y: i32, xrel: i32, yrel: i32 },
    MouseButtonDown { button: u8, x: i32, y: i32 },
    MouseButtonUp { button: u8, x: i32, y: i32 },
}

/// How pointer movement is reported to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerMode {
    /// Deltas derived from window positions.
    #[default]
    Absolute,
    /// Raw relative motion, local cursor captured.
    Relative,
}

impl PointerMode {
    pub fn is_relative(self) -> bool {
        self == PointerMode::Relative
    }

    pub fn toggled(self) -> Self {
        match self {
            PointerMode::Absolute => PointerMode::Relative,
            PointerMode::Relative => PointerMode::Absolute,
        }
    }
}

// ── Seams ────────────────────────────────────────────────────────

/// Where local events come from (a window system, or a channel).
pub trait InputSource: Send {
    /// Next pending event, without blocking.
    fn poll_event(&mut self) -> Option<InputEvent>;

    /// Move the local cursor to a window position.
    fn warp_cursor(&mut self, x: i32, y: i32);

    /// Capture the cursor and report relative motion.
    fn set_relative_mode(&mut self, enabled: bool);
}

/// Primitive calls of the remote-display protocol.
///
/// Calls only queue the message; a failure means the session is gone.
pub trait RemoteInput: Send + Sync {
    fn set_pointer_mode(&self, relative: bool) -> Result<(), KvmError>;
    fn key_down(&self, code: u32) -> Result<(), KvmError>;
    fn key_up(&self, code: u32) -> Result<(), KvmError>;
    fn pointer_move(&self, dx: i32, dy: i32) -> Result<(), KvmError>;
    fn pointer_set_position(&self, x: i32, y: i32) -> Result<(), KvmError>;
    fn button_press(&self, button: u8) -> Result<(), KvmError>;
    fn button_release(&self, button: u8) -> Result<(), KvmError>;
}

impl<T: RemoteInput + ?Sized> RemoteInput for Arc<T> {
    fn set_pointer_mode(&self, relative: bool) -> Result<(), KvmError> {
        (**self).set_pointer_mode(relative)
    }
    fn key_down(&self, code: u32) -> Result<(), KvmError> {
        (**self).key_down(code)
    }
    fn key_up(&self, code: u32) -> Result<(), KvmError> {
        (**self).key_up(code)
    }
    fn pointer_move(&self, dx: i32, dy: i32) -> Result<(), KvmError> {
        (**self).pointer_move(dx, dy)
    }
    fn pointer_set_position(&self, x: i32, y: i32) -> Result<(), KvmError> {
        (**self).pointer_set_position(x, y)
    }
    fn button_press(&self, button: u8) -> Result<(), KvmError> {
        (**self).button_press(button)
    }
    fn button_release(&self, button: u8) -> Result<(), KvmError> {
        (**self).button_release(button)
    }
}

/// The guest-reported absolute pointer position.
pub trait GuestCursor: Send + Sync {
    fn position(&self) -> (i32, i32);
}
