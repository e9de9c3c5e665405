//! Input forwarder.
//!
//! Translates local events into remote-protocol calls. Pointer mode is a
//! two-state machine toggled by a hotkey that never reaches the guest:
//!
//! ```text
//!            hotkey (initial press)
//!  Absolute ───────────────────────► Relative
//!     ▲   deltas from window pos       raw xrel/yrel, cursor captured
//!     └─────────────────────────────────┘
//!            hotkey: re-warp to guest cursor
//! ```
//!
//! Nothing but `Quit` is translated before the first frame has been
//! presented; guest pointer coordinates mean nothing until then.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use super::scancode::{SCROLL_LOCK, map_scancode};
use super::{GuestCursor, InputEvent, InputSource, PointerMode, RemoteInput};
use crate::render::FrameSignals;

/// Synthetic buttons for wheel up / down.
pub const WHEEL_UP_BUTTON: u8 = 4;
pub const WHEEL_DOWN_BUTTON: u8 = 5;

// ── PointerState ─────────────────────────────────────────────────

/// Pointer bookkeeping, owned by the forwarder alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerState {
    /// Last known absolute position.
    pub x: i32,
    pub y: i32,
    pub mode: PointerMode,
    /// Whether the guest's starting position has been applied.
    pub initialised: bool,
}

// ── InputForwarder ───────────────────────────────────────────────

pub struct InputForwarder<S, R> {
    source: S,
    remote: R,
    cursor: Arc<dyn GuestCursor>,
    signals: Arc<FrameSignals>,
    running: Arc<AtomicBool>,
    toggle_key: u32,
    pointer: PointerState,
    seen_generation: u64,
}

impl<S: InputSource, R: RemoteInput> InputForwarder<S, R> {
    pub fn new(
        source: S,
        remote: R,
        cursor: Arc<dyn GuestCursor>,
        signals: Arc<FrameSignals>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            remote,
            cursor,
            signals,
            running,
            toggle_key: SCROLL_LOCK,
            pointer: PointerState::default(),
            seen_generation: 0,
        }
    }

    /// Use a different HID usage as the pointer-mode hotkey.
    pub fn with_toggle_key(mut self, usage: u32) -> Self {
        self.toggle_key = usage;
        self
    }

    pub fn pointer(&self) -> PointerState {
        self.pointer
    }

    /// Drain every pending event. Returns how many were taken.
    pub fn pump(&mut self) -> usize {
        let mut taken = 0;
        while self.running.load(Ordering::SeqCst) {
            let Some(event) = self.source.poll_event() else {
                break;
            };
            taken += 1;
            self.handle(event);
        }
        taken
    }

    /// Translate one event.
    pub fn handle(&mut self, event: InputEvent) {
        if event == InputEvent::Quit {
            info!("quit requested");
            self.running.store(false, Ordering::SeqCst);
            return;
        }

        if !self.signals.has_started() {
            return;
        }
        self.sync_pointer();

        match event {
            InputEvent::Quit => {}

            InputEvent::KeyDown { scancode, repeat } if scancode == self.toggle_key => {
                if !repeat {
                    self.toggle_mode();
                }
            }
            InputEvent::KeyUp { scancode } if scancode == self.toggle_key => {}

            InputEvent::KeyDown { scancode, .. } => {
                if let Some(code) = map_scancode(scancode) {
                    if let Err(e) = self.remote.key_down(code) {
                        error!("key down: failed to send message: {e}");
                    }
                }
            }
            InputEvent::KeyUp { scancode } => {
                if let Some(code) = map_scancode(scancode) {
                    if let Err(e) = self.remote.key_up(code) {
                        error!("key up: failed to send message: {e}");
                    }
                }
            }

            InputEvent::MouseWheel { y } => {
                let button = match y.signum() {
                    1 => WHEEL_UP_BUTTON,
                    -1 => WHEEL_DOWN_BUTTON,
                    _ => return,
                };
                let sent = self
                    .remote
                    .button_press(button)
                    .and_then(|()| self.remote.button_release(button));
                if let Err(e) = sent {
                    error!("mouse wheel: failed to send messages: {e}");
                }
            }

            InputEvent::MouseMotion { x, y, xrel, yrel } => {
                let (dx, dy) = match self.pointer.mode {
                    PointerMode::Relative => (xrel, yrel),
                    PointerMode::Absolute => (x - self.pointer.x, y - self.pointer.y),
                };
                match self.remote.pointer_move(dx, dy) {
                    Ok(()) => self.set_position(x, y),
                    Err(e) => error!("mouse motion: failed to send message: {e}"),
                }
            }

            InputEvent::MouseButtonDown { button, x, y } => {
                let sent = self
                    .remote
                    .pointer_set_position(x, y)
                    .and_then(|()| self.remote.button_press(button));
                match sent {
                    Ok(()) => self.set_position(x, y),
                    Err(e) => error!("button down: failed to send message: {e}"),
                }
            }
            InputEvent::MouseButtonUp { button, x, y } => {
                let sent = self
                    .remote
                    .pointer_set_position(x, y)
                    .and_then(|()| self.remote.button_release(button));
                match sent {
                    Ok(()) => self.set_position(x, y),
                    Err(e) => error!("button up: failed to send message: {e}"),
                }
            }
        }
    }

    /// Align the local cursor with the guest on the first translated
    /// event and after every format change.
    fn sync_pointer(&mut self) {
        let generation = self.signals.generation();

        if !self.pointer.initialised {
            if let Err(e) = self.remote.set_pointer_mode(false) {
                error!("failed to reset pointer mode: {e}");
            }
            self.warp_to_guest();
            self.pointer.initialised = true;
            self.seen_generation = generation;
            return;
        }

        if generation != self.seen_generation {
            debug!("display format changed, re-syncing cursor");
            self.warp_to_guest();
            self.seen_generation = generation;
        }
    }

    fn toggle_mode(&mut self) {
        let mode = self.pointer.mode.toggled();
        let relative = mode.is_relative();
        self.pointer.mode = mode;

        if let Err(e) = self.remote.set_pointer_mode(relative) {
            error!("failed to switch pointer mode: {e}");
        }
        self.source.set_relative_mode(relative);
        info!("pointer mode: {mode:?}");

        if !relative {
            self.warp_to_guest();
        }
    }

    fn warp_to_guest(&mut self) {
        let (x, y) = self.cursor.position();
        self.set_position(x, y);
        self.source.warp_cursor(x, y);
    }

    fn set_position(&mut self, x: i32, y: i32) {
        self.pointer.x = x;
        self.pointer.y = y;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvmError;
    use crate::input::{ChannelInput, InputHandle};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Mode(bool),
        KeyDown(u32),
        KeyUp(u32),
        Move(i32, i32),
        Position(i32, i32),
        Press(u8),
        Release(u8),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail: AtomicBool,
    }

    impl Recorder {
        fn record(&self, call: Call) -> Result<(), KvmError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(KvmError::RemoteClosed);
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl RemoteInput for Recorder {
        fn set_pointer_mode(&self, relative: bool) -> Result<(), KvmError> {
            self.record(Call::Mode(relative))
        }
        fn key_down(&self, code: u32) -> Result<(), KvmError> {
            self.record(Call::KeyDown(code))
        }
        fn key_up(&self, code: u32) -> Result<(), KvmError> {
            self.record(Call::KeyUp(code))
        }
        fn pointer_move(&self, dx: i32, dy: i32) -> Result<(), KvmError> {
            self.record(Call::Move(dx, dy))
        }
        fn pointer_set_position(&self, x: i32, y: i32) -> Result<(), KvmError> {
            self.record(Call::Position(x, y))
        }
        fn button_press(&self, button: u8) -> Result<(), KvmError> {
            self.record(Call::Press(button))
        }
        fn button_release(&self, button: u8) -> Result<(), KvmError> {
            self.record(Call::Release(button))
        }
    }

    struct Cursor(Mutex<(i32, i32)>);

    impl GuestCursor for Cursor {
        fn position(&self) -> (i32, i32) {
            *self.0.lock().unwrap()
        }
    }

    struct Rig {
        fwd: InputForwarder<ChannelInput, Arc<Recorder>>,
        handle: InputHandle,
        remote: Arc<Recorder>,
        cursor: Arc<Cursor>,
        signals: Arc<FrameSignals>,
        running: Arc<AtomicBool>,
    }

    fn rig() -> Rig {
        let (source, handle) = ChannelInput::new();
        let remote = Arc::new(Recorder::default());
        let cursor = Arc::new(Cursor(Mutex::new((100, 50))));
        let signals = Arc::new(FrameSignals::default());
        let running = Arc::new(AtomicBool::new(true));
        let fwd = InputForwarder::new(source, remote.clone(), cursor.clone(), signals.clone(), running.clone());
        Rig {
            fwd,
            handle,
            remote,
            cursor,
            signals,
            running,
        }
    }

    /// A rig that has seen its first frame and synced the pointer.
    fn started_rig() -> Rig {
        let mut r = rig();
        r.signals.mark_started();
        r.fwd.handle(InputEvent::KeyDown { scancode: 0, repeat: false });
        r.remote.take();
        r
    }

    #[test]
    fn quit_stops_even_before_start() {
        let mut r = rig();
        r.handle.send(InputEvent::KeyDown { scancode: 0x04, repeat: false }).unwrap();
        r.handle.quit().unwrap();
        r.handle.send(InputEvent::KeyDown { scancode: 0x05, repeat: false }).unwrap();

        assert_eq!(r.fwd.pump(), 2);
        assert!(!r.running.load(Ordering::SeqCst));
        assert!(r.remote.take().is_empty());
    }

    #[test]
    fn first_event_after_start_syncs_pointer() {
        let mut r = rig();
        r.signals.mark_started();
        r.handle.send(InputEvent::KeyDown { scancode: 0x04, repeat: false }).unwrap();
        r.fwd.pump();

        assert_eq!(r.remote.take(), vec![Call::Mode(false), Call::KeyDown(0x1E)]);
        assert_eq!(r.handle.last_warp(), Some((100, 50)));
        assert!(r.fwd.pointer().initialised);
    }

    #[test]
    fn unmapped_key_is_dropped() {
        let mut r = started_rig();
        r.fwd.handle(InputEvent::KeyDown { scancode: 0x66, repeat: false });
        r.fwd.handle(InputEvent::KeyUp { scancode: 0x66 });
        assert!(r.remote.take().is_empty());
    }

    #[test]
    fn toggle_twice_restores_mode_and_rewarps() {
        let mut r = started_rig();
        *r.cursor.0.lock().unwrap() = (300, 200);

        r.fwd.handle(InputEvent::KeyDown { scancode: SCROLL_LOCK, repeat: false });
        assert_eq!(r.fwd.pointer().mode, PointerMode::Relative);
        assert!(r.handle.is_relative());
        r.fwd.handle(InputEvent::KeyDown { scancode: SCROLL_LOCK, repeat: true });
        r.fwd.handle(InputEvent::KeyUp { scancode: SCROLL_LOCK });
        r.fwd.handle(InputEvent::KeyDown { scancode: SCROLL_LOCK, repeat: false });

        assert_eq!(r.fwd.pointer().mode, PointerMode::Absolute);
        assert!(!r.handle.is_relative());
        assert_eq!(r.handle.last_warp(), Some((300, 200)));
        assert_eq!((r.fwd.pointer().x, r.fwd.pointer().y), (300, 200));
        // the hotkey itself never reaches the guest
        assert_eq!(r.remote.take(), vec![Call::Mode(true), Call::Mode(false)]);
    }

    #[test]
    fn custom_toggle_key() {
        let mut r = started_rig();
        r.fwd = r.fwd.with_toggle_key(0x45);
        r.fwd.handle(InputEvent::KeyDown { scancode: 0x45, repeat: false });
        r.fwd.handle(InputEvent::KeyDown { scancode: SCROLL_LOCK, repeat: false });
        assert_eq!(r.remote.take(), vec![Call::Mode(true), Call::KeyDown(0x46)]);
    }

    #[test]
    fn absolute_motion_sends_deltas() {
        let mut r = started_rig();
        r.fwd.handle(InputEvent::MouseMotion { x: 110, y: 45, xrel: 99, yrel: 99 });
        r.fwd.handle(InputEvent::MouseMotion { x: 111, y: 47, xrel: 99, yrel: 99 });
        assert_eq!(r.remote.take(), vec![Call::Move(10, -5), Call::Move(1, 2)]);
    }

    #[test]
    fn relative_motion_sends_raw_deltas() {
        let mut r = started_rig();
        r.fwd.handle(InputEvent::KeyDown { scancode: SCROLL_LOCK, repeat: false });
        r.remote.take();
        r.fwd.handle(InputEvent::MouseMotion { x: 0, y: 0, xrel: -3, yrel: 7 });
        assert_eq!(r.remote.take(), vec![Call::Move(-3, 7)]);
    }

    #[test]
    fn wheel_maps_to_synthetic_buttons() {
        let mut r = started_rig();
        r.fwd.handle(InputEvent::MouseWheel { y: 1 });
        r.fwd.handle(InputEvent::MouseWheel { y: -2 });
        r.fwd.handle(InputEvent::MouseWheel { y: 0 });
        assert_eq!(
            r.remote.take(),
            vec![Call::Press(4), Call::Release(4), Call::Press(5), Call::Release(5)]
        );
    }

    #[test]
    fn buttons_send_position_first() {
        let mut r = started_rig();
        r.fwd.handle(InputEvent::MouseButtonDown { button: 1, x: 5, y: 6 });
        r.fwd.handle(InputEvent::MouseButtonUp { button: 1, x: 7, y: 8 });
        assert_eq!(
            r.remote.take(),
            vec![Call::Position(5, 6), Call::Press(1), Call::Position(7, 8), Call::Release(1)]
        );
        assert_eq!((r.fwd.pointer().x, r.fwd.pointer().y), (7, 8));
    }

    #[test]
    fn format_change_rewarps() {
        let mut r = started_rig();
        let warps = r.handle.warp_count();
        *r.cursor.0.lock().unwrap() = (20, 30);

        r.signals.bump_generation();
        r.fwd.handle(InputEvent::KeyUp { scancode: 0x04 });
        r.fwd.handle(InputEvent::KeyUp { scancode: 0x04 });

        assert_eq!(r.handle.warp_count(), warps + 1);
        assert_eq!(r.handle.last_warp(), Some((20, 30)));
    }

    #[test]
    fn send_failure_keeps_position() {
        let mut r = started_rig();
        r.remote.fail.store(true, Ordering::SeqCst);
        r.fwd.handle(InputEvent::MouseMotion { x: 500, y: 500, xrel: 0, yrel: 0 });
        assert_eq!((r.fwd.pointer().x, r.fwd.pointer().y), (100, 50));
        assert!(r.running.load(Ordering::SeqCst));
    }
}
