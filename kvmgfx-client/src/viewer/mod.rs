//! The local window: shows published frames and captures input.
//!
//! | Module   | Purpose                                         |
//! |----------|-------------------------------------------------|
//! | `gpu`    | wgpu blit of the composited canvas              |
//! | `keymap` | winit keys, buttons and wheel → [`InputEvent`]  |
//!
//! The winit event loop runs on its own thread. It polls the display's
//! frame channel, draws every new canvas, and turns window events into
//! [`InputEvent`]s on an [`InputHandle`]. The forwarder's end is a
//! [`WindowInput`], which applies cursor warps and capture directly to
//! the window.

pub mod gpu;
pub mod keymap;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use kvmgfx_core::input::{ChannelInput, InputEvent, InputHandle, InputSource};
use kvmgfx_core::{KvmError, PresentedFrame};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{DeviceEvent, DeviceId, ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::{CursorGrabMode, Window, WindowId};

use crate::config::DisplayConfig;
use gpu::FrameRenderer;
use keymap::{button_index, hid_usage, wheel_steps};

/// How often the event loop looks for a new frame.
const FRAME_POLL: Duration = Duration::from_millis(4);

type Ready = oneshot::Sender<Result<Arc<Window>, String>>;

// ── Viewport ─────────────────────────────────────────────────────

/// Maps between guest frame coordinates and window pixels when the
/// window manager did not grant the frame's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub frame: (u32, u32),
    pub window: (u32, u32),
}

impl Viewport {
    pub fn new(frame: (u32, u32), window: (u32, u32)) -> Self {
        Self { frame, window }
    }

    fn scale(&self) -> (f64, f64) {
        let axis = |frame: u32, window: u32| {
            if frame == 0 || window == 0 {
                1.0
            } else {
                f64::from(frame) / f64::from(window)
            }
        };
        (axis(self.frame.0, self.window.0), axis(self.frame.1, self.window.1))
    }

    /// Window position → frame position.
    pub fn to_frame(&self, x: f64, y: f64) -> (i32, i32) {
        let (sx, sy) = self.scale();
        ((x * sx).floor() as i32, (y * sy).floor() as i32)
    }

    /// Frame position → window position.
    pub fn to_window(&self, x: i32, y: i32) -> (f64, f64) {
        let (sx, sy) = self.scale();
        (f64::from(x) / sx, f64::from(y) / sy)
    }
}

/// Top-left corner that centres `size` within a monitor.
pub fn centered_origin(
    monitor_origin: PhysicalPosition<i32>,
    monitor_size: PhysicalSize<u32>,
    size: PhysicalSize<u32>,
) -> PhysicalPosition<i32> {
    let offset = |area: u32, len: u32| ((i64::from(area) - i64::from(len)) / 2) as i32;
    PhysicalPosition::new(
        monitor_origin.x + offset(monitor_size.width, size.width),
        monitor_origin.y + offset(monitor_size.height, size.height),
    )
}

fn center_window(window: &Window, size: PhysicalSize<u32>) {
    if let Some(monitor) = window.current_monitor() {
        window.set_outer_position(centered_origin(monitor.position(), monitor.size(), size));
    }
}

// ── WindowInput ──────────────────────────────────────────────────

/// [`InputSource`] backed by the viewer window.
///
/// Events arrive from the event-loop thread; warps and capture requests
/// are applied to the window straight away.
pub struct WindowInput {
    events: ChannelInput,
    window: Arc<Window>,
    frames: watch::Receiver<Arc<PresentedFrame>>,
    show_cursor: bool,
}

impl WindowInput {
    pub fn new(
        events: ChannelInput,
        window: Arc<Window>,
        frames: watch::Receiver<Arc<PresentedFrame>>,
        show_cursor: bool,
    ) -> Self {
        Self {
            events,
            window,
            frames,
            show_cursor,
        }
    }

    fn viewport(&self) -> Viewport {
        let frame = self.frames.borrow();
        let size = self.window.inner_size();
        Viewport::new((frame.width, frame.height), (size.width, size.height))
    }
}

impl InputSource for WindowInput {
    fn poll_event(&mut self) -> Option<InputEvent> {
        self.events.poll_event()
    }

    fn warp_cursor(&mut self, x: i32, y: i32) {
        self.events.warp_cursor(x, y);
        let (wx, wy) = self.viewport().to_window(x, y);
        if let Err(e) = self.window.set_cursor_position(PhysicalPosition::new(wx, wy)) {
            debug!("cursor warp not applied: {e}");
        }
    }

    fn set_relative_mode(&mut self, enabled: bool) {
        self.events.set_relative_mode(enabled);
        if enabled {
            let grabbed = self
                .window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| self.window.set_cursor_grab(CursorGrabMode::Confined));
            if let Err(e) = grabbed {
                warn!("failed to capture the cursor: {e}");
            }
            self.window.set_cursor_visible(false);
        } else {
            if let Err(e) = self.window.set_cursor_grab(CursorGrabMode::None) {
                debug!("failed to release the cursor: {e}");
            }
            self.window.set_cursor_visible(self.show_cursor);
        }
    }
}

// ── Viewer ───────────────────────────────────────────────────────

/// Handle to the event-loop thread. Dropping it closes the window.
pub struct Viewer {
    open: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Viewer {
    /// Open the window and wait until it can draw.
    ///
    /// Every input event is sent on `input`; the returned window is
    /// what a [`WindowInput`] drives.
    pub async fn open(
        config: &DisplayConfig,
        frames: watch::Receiver<Arc<PresentedFrame>>,
        input: InputHandle,
    ) -> Result<(Self, Arc<Window>), KvmError> {
        let open = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();

        let mut app = ViewerApp::new(config.clone(), frames, input, open.clone(), ready_tx);
        let thread = std::thread::Builder::new()
            .name("kvmgfx-viewer".into())
            .spawn(move || {
                if let Err(e) = run_event_loop(&mut app) {
                    app.fail(e);
                }
            })
            .map_err(|e| KvmError::Display(format!("failed to start the viewer thread: {e}")))?;

        let viewer = Self {
            open,
            thread: Some(thread),
        };
        match ready_rx.await {
            Ok(Ok(window)) => Ok((viewer, window)),
            Ok(Err(e)) => Err(KvmError::Display(e)),
            Err(_) => Err(KvmError::Display("viewer exited before opening a window".into())),
        }
    }

    /// Close the window and wait for the event loop to finish.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("viewer thread panicked");
            }
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_event_loop(app: &mut ViewerApp) -> Result<(), String> {
    #[cfg(target_os = "linux")]
    let event_loop = {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        use winit::platform::x11::EventLoopBuilderExtX11;

        let mut builder = EventLoop::builder();
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
        } else {
            EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
        }
        builder.build()
    };
    #[cfg(not(target_os = "linux"))]
    let event_loop = EventLoop::new();

    let event_loop = event_loop.map_err(|e| format!("failed to create the event loop: {e}"))?;
    event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + FRAME_POLL));
    event_loop
        .run_app(app)
        .map_err(|e| format!("event loop failed: {e}"))
}

// ── ViewerApp ────────────────────────────────────────────────────

struct ViewerApp {
    config: DisplayConfig,
    frames: watch::Receiver<Arc<PresentedFrame>>,
    input: InputHandle,
    open: Arc<AtomicBool>,
    ready: Option<Ready>,
    window: Option<Arc<Window>>,
    renderer: Option<FrameRenderer>,
    viewport: Viewport,
    pointer: (i32, i32),
    focused: bool,
}

impl ViewerApp {
    fn new(
        config: DisplayConfig,
        frames: watch::Receiver<Arc<PresentedFrame>>,
        input: InputHandle,
        open: Arc<AtomicBool>,
        ready: Ready,
    ) -> Self {
        let size = (config.width, config.height);
        Self {
            config,
            frames,
            input,
            open,
            ready: Some(ready),
            window: None,
            renderer: None,
            viewport: Viewport::new(size, size),
            pointer: (0, 0),
            focused: false,
        }
    }

    fn fail(&mut self, reason: String) {
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Err(reason));
            }
            None => error!("{reason}"),
        }
    }

    fn open_window(&self, event_loop: &ActiveEventLoop) -> Result<(Arc<Window>, FrameRenderer), String> {
        let size = PhysicalSize::new(self.config.width.max(1), self.config.height.max(1));
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(size)
            .with_resizable(false)
            .with_decorations(!self.config.borderless);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|e| format!("failed to create window: {e}"))?,
        );
        window.set_cursor_visible(!self.config.hide_cursor);
        center_window(&window, size);

        let renderer = FrameRenderer::new(window.clone()).map_err(|e| e.to_string())?;
        Ok((window, renderer))
    }

    fn send(&self, event: InputEvent) {
        if let Err(e) = self.input.send(event) {
            debug!("input event dropped: {e}");
        }
    }

    /// Draw a newly published frame, following its size.
    fn show(&mut self, frame: &PresentedFrame) {
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return;
        };
        if frame.width == 0 || frame.height == 0 {
            return;
        }

        if self.viewport.frame != (frame.width, frame.height) {
            info!("window resized to {}x{}", frame.width, frame.height);
            self.viewport.frame = (frame.width, frame.height);
            let size = PhysicalSize::new(frame.width, frame.height);
            let _ = window.request_inner_size(size);
            center_window(window, size);
        }
        renderer.upload(frame);
        window.request_redraw();
    }

    fn pointer_moved(&mut self, position: PhysicalPosition<f64>) {
        let (x, y) = self.viewport.to_frame(position.x, position.y);
        let (last_x, last_y) = self.pointer;
        self.pointer = (x, y);
        // captured motion comes from raw device deltas instead
        if !self.input.is_relative() {
            self.send(InputEvent::MouseMotion {
                x,
                y,
                xrel: x - last_x,
                yrel: y - last_y,
            });
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.open_window(event_loop) {
            Ok((window, renderer)) => {
                let size = window.inner_size();
                self.viewport.window = (size.width, size.height);
                self.window = Some(window.clone());
                self.renderer = Some(renderer);
                info!("window open: {}", self.config.title);
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(window));
                }
            }
            Err(e) => {
                self.fail(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.send(InputEvent::Quit),
            WindowEvent::Focused(focused) => self.focused = focused,
            WindowEvent::Resized(size) => {
                self.viewport.window = (size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(e) = renderer.render() {
                        warn!("{e}");
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event, is_synthetic, ..
            } => {
                // keys held while focus arrives are not real presses
                if is_synthetic {
                    return;
                }
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                let Some(scancode) = hid_usage(code) else {
                    debug!("no HID usage for {code:?}");
                    return;
                };
                match event.state {
                    ElementState::Pressed => self.send(InputEvent::KeyDown {
                        scancode,
                        repeat: event.repeat,
                    }),
                    ElementState::Released => self.send(InputEvent::KeyUp { scancode }),
                }
            }
            WindowEvent::CursorMoved { position, .. } => self.pointer_moved(position),
            WindowEvent::MouseInput { state, button, .. } => {
                let Some(button) = button_index(button) else {
                    return;
                };
                let (x, y) = self.pointer;
                match state {
                    ElementState::Pressed => self.send(InputEvent::MouseButtonDown { button, x, y }),
                    ElementState::Released => self.send(InputEvent::MouseButtonUp { button, x, y }),
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let y = wheel_steps(delta);
                if y != 0 {
                    self.send(InputEvent::MouseWheel { y });
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        let DeviceEvent::MouseMotion { delta: (dx, dy) } = event else {
            return;
        };
        if !self.focused || !self.input.is_relative() {
            return;
        }
        let (x, y) = self.pointer;
        self.send(InputEvent::MouseMotion {
            x,
            y,
            xrel: dx.round() as i32,
            yrel: dy.round() as i32,
        });
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if !self.open.load(Ordering::SeqCst) {
            event_loop.exit();
            return;
        }
        if self.frames.has_changed().unwrap_or(false) {
            let frame = self.frames.borrow_and_update().clone();
            self.show(&frame);
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + FRAME_POLL));
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_identity_when_sizes_match() {
        let vp = Viewport::new((640, 480), (640, 480));
        assert_eq!(vp.to_frame(100.0, 200.0), (100, 200));
        assert_eq!(vp.to_window(100, 200), (100.0, 200.0));
    }

    #[test]
    fn viewport_scales_into_frame_space() {
        // a 1920x1080 guest shown in a window clamped to 960x540
        let vp = Viewport::new((1920, 1080), (960, 540));
        assert_eq!(vp.to_frame(480.0, 270.0), (960, 540));
        assert_eq!(vp.to_frame(959.9, 539.9), (1919, 1079));
        assert_eq!(vp.to_window(960, 540), (480.0, 270.0));
    }

    #[test]
    fn viewport_tolerates_empty_sizes() {
        let vp = Viewport::new((0, 0), (800, 600));
        assert_eq!(vp.to_frame(10.0, 20.0), (10, 20));
        let vp = Viewport::new((800, 600), (0, 0));
        assert_eq!(vp.to_window(10, 20), (10.0, 20.0));
    }

    #[test]
    fn window_is_centred_on_its_monitor() {
        let origin = centered_origin(
            PhysicalPosition::new(1920, 0),
            PhysicalSize::new(2560, 1440),
            PhysicalSize::new(1280, 720),
        );
        assert_eq!(origin, PhysicalPosition::new(1920 + 640, 360));
    }

    #[test]
    fn oversized_window_overhangs_evenly() {
        let origin = centered_origin(
            PhysicalPosition::new(0, 0),
            PhysicalSize::new(1280, 720),
            PhysicalSize::new(1920, 1080),
        );
        assert_eq!(origin, PhysicalPosition::new(-320, -180));
    }
}
