//! Channel-backed input source.
//!
//! [`ChannelInput`] is the forwarder's end; [`InputHandle`] is given to
//! whatever produces events (a window system, the Ctrl-C handler,
//! tests). Cursor warps and capture requests are recorded so the
//! producer can apply them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::{InputEvent, InputSource};
use crate::error::KvmError;

#[derive(Debug, Default)]
struct CursorState {
    last_warp: Option<(i32, i32)>,
    warps: u64,
    relative: bool,
}

/// Create a connected source / handle pair.
pub fn input_channel() -> (ChannelInput, InputHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cursor = Arc::new(Mutex::new(CursorState::default()));
    (
        ChannelInput {
            rx,
            cursor: cursor.clone(),
        },
        InputHandle { tx, cursor },
    )
}

// ── ChannelInput ─────────────────────────────────────────────────

pub struct ChannelInput {
    rx: mpsc::UnboundedReceiver<InputEvent>,
    cursor: Arc<Mutex<CursorState>>,
}

impl ChannelInput {
    pub fn new() -> (Self, InputHandle) {
        input_channel()
    }

    fn cursor(&self) -> std::sync::MutexGuard<'_, CursorState> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InputSource for ChannelInput {
    fn poll_event(&mut self) -> Option<InputEvent> {
        self.rx.try_recv().ok()
    }

    fn warp_cursor(&mut self, x: i32, y: i32) {
        let mut cursor = self.cursor();
        cursor.last_warp = Some((x, y));
        cursor.warps += 1;
    }

    fn set_relative_mode(&mut self, enabled: bool) {
        self.cursor().relative = enabled;
    }
}

// ── InputHandle ──────────────────────────────────────────────────

/// Producer side of a [`ChannelInput`].
#[derive(Clone)]
pub struct InputHandle {
    tx: mpsc::UnboundedSender<InputEvent>,
    cursor: Arc<Mutex<CursorState>>,
}

impl InputHandle {
    pub fn send(&self, event: InputEvent) -> Result<(), KvmError> {
        self.tx.send(event)?;
        Ok(())
    }

    /// Ask the pipeline to stop.
    pub fn quit(&self) -> Result<(), KvmError> {
        self.send(InputEvent::Quit)
    }

    /// Where the forwarder last asked the cursor to go.
    pub fn last_warp(&self) -> Option<(i32, i32)> {
        self.cursor().last_warp
    }

    pub fn warp_count(&self) -> u64 {
        self.cursor().warps
    }

    /// Whether the forwarder wants the cursor captured.
    pub fn is_relative(&self) -> bool {
        self.cursor().relative
    }

    fn cursor(&self) -> std::sync::MutexGuard<'_, CursorState> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ────────────────────────────────────────────────────────
