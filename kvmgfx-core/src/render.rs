//! The render loop: wait → negotiate → decode → acknowledge → present.
//!
//! One iteration handles one frame. The loop owns the negotiated
//! format and the display surface; the only state it shares is
//! [`FrameSignals`] (read by the input forwarder) and the running flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::display::DisplayBackend;
use crate::error::KvmError;
use crate::format::{self, FormatPlan, NegotiatedFormat};
use crate::header::FrameHeader;
use crate::present::DisplaySurface;
use crate::shm::{FrameWait, SharedFrameChannel};

// ── FrameSignals ─────────────────────────────────────────────────

/// Render-side facts the input forwarder needs.
#[derive(Debug, Default)]
pub struct FrameSignals {
    started: AtomicBool,
    generation: AtomicU64,
}

impl FrameSignals {
    /// Record a presented frame. True only the first time.
    pub fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Bumped on every format change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

// ── RenderLoop ───────────────────────────────────────────────────

/// What one [`RenderLoop::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Presented,
    /// Nothing drawn: region not ready, unknown format, or a bad frame.
    Skipped,
    Stopped,
}

struct ActiveFormat {
    surface: DisplaySurface,
    plan: FormatPlan,
}

pub struct RenderLoop<B: DisplayBackend> {
    channel: SharedFrameChannel,
    backend: B,
    signals: Arc<FrameSignals>,
    running: Arc<AtomicBool>,
    format: NegotiatedFormat,
    active: Option<ActiveFormat>,
    rejected: Option<NegotiatedFormat>,
    invalid_backoff: Duration,
    reconfigurations: u64,
}

impl<B: DisplayBackend> RenderLoop<B> {
    pub fn new(channel: SharedFrameChannel, backend: B, signals: Arc<FrameSignals>, running: Arc<AtomicBool>) -> Self {
        Self {
            channel,
            backend,
            signals,
            running,
            format: NegotiatedFormat::invalid(),
            active: None,
            rejected: None,
            invalid_backoff: Duration::from_millis(1),
            reconfigurations: 0,
        }
    }

    /// Sleep between passes while the region is not initialised.
    pub fn with_invalid_backoff(mut self, backoff: Duration) -> Self {
        self.invalid_backoff = backoff;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn channel(&self) -> &SharedFrameChannel {
        &self.channel
    }

    /// The cached format the next header is compared against.
    pub fn format(&self) -> NegotiatedFormat {
        self.format
    }

    /// Surfaces allocated so far.
    pub fn reconfigurations(&self) -> u64 {
        self.reconfigurations
    }

    /// Run until the flag clears or a fatal error, then hand the
    /// backend back so the caller controls when it is dropped.
    pub fn run(mut self) -> B {
        info!("render loop started");
        while self.running.load(Ordering::SeqCst) {
            match self.step() {
                Ok(Step::Stopped) => break,
                Ok(_) => {}
                Err(e) => {
                    if self.running.swap(false, Ordering::SeqCst) {
                        error!("render loop failed: {e}");
                    }
                    break;
                }
            }
        }

        if let Some(active) = self.active.take() {
            active.surface.release(&mut self.backend);
        }
        info!("render loop stopped");
        self.backend
    }

    /// One pass of the loop.
    pub fn step(&mut self) -> Result<Step, KvmError> {
        let header = match self.channel.wait_for_frame()? {
            FrameWait::Ready(header) => header,
            FrameWait::NotReady => {
                std::thread::sleep(self.invalid_backoff);
                return Ok(Step::Skipped);
            }
            FrameWait::Stopped => return Ok(Step::Stopped),
        };

        if !self.format.matches(&header) && !self.negotiate(&header) {
            return Ok(Step::Skipped);
        }

        let Some(active) = self.active.as_mut() else {
            return Ok(Step::Skipped);
        };

        // XOR blending is only ever on for the XOR presenter's own call.
        self.backend.set_xor_blend(false);

        let channel = &self.channel;
        let guest_id = header.guest_id;
        let mut acked = false;
        let result = active.plan.presenter.present(
            &mut self.backend,
            &mut active.surface,
            active.plan.codec,
            &header,
            channel.payload(),
            &mut || {
                acked = true;
                channel.acknowledge(guest_id)
            },
        );

        if let Err(e) = result {
            warn!("dropping frame: {e}");
            if !acked {
                // release the buffer anyway; failure is logged by the channel
                let _ = channel.acknowledge(guest_id);
            }
            return Ok(Step::Skipped);
        }

        trace!("presented {}x{} frame", header.width, header.height);
        if self.signals.mark_started() {
            info!("first frame presented");
        }
        Ok(Step::Presented)
    }

    /// Reconfigure for `header`. `false` defers: the format is not
    /// recognised or cannot be displayed, and the cache is left invalid.
    fn negotiate(&mut self, header: &FrameHeader) -> bool {
        if let Some(active) = self.active.take() {
            active.surface.release(&mut self.backend);
        }

        let Some(plan) = format::resolve(header) else {
            if !self.format.is_invalid() {
                debug!(
                    "unrecognised format (frame type {}, compression {}), waiting",
                    header.frame_type, header.comp_type
                );
            }
            self.format = NegotiatedFormat::invalid();
            return false;
        };

        let surface = match self.configure(header, plan) {
            Ok(surface) => surface,
            Err(e) => {
                self.reject(header, &e);
                return false;
            }
        };

        self.format = NegotiatedFormat::from_header(header);
        self.active = Some(ActiveFormat { surface, plan });
        self.rejected = None;
        self.reconfigurations += 1;
        self.signals.bump_generation();

        info!(
            "format changed: {:?}/{:?} {}x{} stride {}",
            self.format.frame_type, self.format.comp_type, header.width, header.height, header.stride
        );
        true
    }

    fn configure(&mut self, header: &FrameHeader, plan: FormatPlan) -> Result<DisplaySurface, KvmError> {
        plan.check_geometry(header, self.channel.payload().len())?;
        self.backend.set_window_size(header.width, header.height)?;
        self.backend.center_window()?;
        DisplaySurface::allocate(&mut self.backend, plan.layout, header)
    }

    /// Leave the cache invalid; warn once per offending format.
    fn reject(&mut self, header: &FrameHeader, reason: &KvmError) {
        let offered = NegotiatedFormat::from_header(header);
        if !self.rejected.is_some_and(|r| r.same_as(&offered)) {
            warn!(
                "cannot display {}x{} stride {} frames: {reason}",
                header.width, header.height, header.stride
            );
        }
        self.rejected = Some(offered);
        self.format = NegotiatedFormat::invalid();
    }
}

// ── Tests ────────────────────────────────────────────────────────
