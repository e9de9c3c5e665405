//! Context orchestration and shutdown ordering.
//!
//! ```text
//! render loop     spawn_blocking   blocks in wait_for_interrupt
//! shm pump        spawn_blocking   blocks in pump_messages (no timeout)
//! remote pump     tokio task       raced against the running flag
//! event pump      tokio task       poll, sleep poll_interval, repeat
//! ```
//!
//! All four share one running flag. Any context that fails while the
//! flag is still set logs and clears it, so the others converge.
//!
//! Shutdown: clear flag → join event pump → disconnect transport (the
//! shm pump's receive cannot time out) → join shm pump → join remote
//! pump → hand the display backend back to be dropped last.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::display::DisplayBackend;
use crate::error::KvmError;
use crate::input::{GuestCursor, InputForwarder, InputSource, RemoteInput};
use crate::remote::RemotePump;
use crate::render::{FrameSignals, RenderLoop};
use crate::shm::{HeaderCursor, SharedFrameChannel, ShmTransport};

/// Event pump cadence when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ── Pipeline ─────────────────────────────────────────────────────

/// Shared pieces of one receiver session, and the factory for the
/// contexts that use them.
pub struct Pipeline {
    transport: Arc<dyn ShmTransport>,
    running: Arc<AtomicBool>,
    signals: Arc<FrameSignals>,
    poll_interval: Duration,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn ShmTransport>) -> Self {
        Self {
            transport,
            running: Arc::new(AtomicBool::new(true)),
            signals: Arc::new(FrameSignals::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Obtain a handle that stops every context when cleared.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn signals(&self) -> Arc<FrameSignals> {
        Arc::clone(&self.signals)
    }

    /// A render loop on `vector` drawing into `backend`.
    pub fn render_loop<B: DisplayBackend>(&self, backend: B, vector: u16) -> RenderLoop<B> {
        let channel = SharedFrameChannel::new(self.transport.clone(), self.stop_handle()).with_vector(vector);
        RenderLoop::new(channel, backend, self.signals(), self.stop_handle())
    }

    /// A forwarder reading the guest cursor from the shared header.
    pub fn forwarder<S: InputSource, R: RemoteInput>(&self, source: S, remote: R) -> InputForwarder<S, R> {
        let cursor: Arc<dyn GuestCursor> = Arc::new(HeaderCursor::new(self.transport.clone()));
        InputForwarder::new(source, remote, cursor, self.signals(), self.stop_handle())
    }

    /// Run every context until the flag clears, then shut down in order.
    pub async fn run<B, S, R, P>(
        self,
        render: RenderLoop<B>,
        forwarder: InputForwarder<S, R>,
        remote: P,
    ) -> Result<B, KvmError>
    where
        B: DisplayBackend + Send + 'static,
        S: InputSource + 'static,
        R: RemoteInput + 'static,
        P: RemotePump + 'static,
    {
        info!("pipeline starting");

        let shm_pump = {
            let transport = self.transport.clone();
            let running = self.stop_handle();
            tokio::task::spawn_blocking(move || pump_transport(transport.as_ref(), &running))
        };
        let remote_pump = tokio::spawn(pump_remote(remote, self.stop_handle()));
        let event_pump = tokio::spawn(pump_events(forwarder, self.stop_handle(), self.poll_interval));
        let render = tokio::task::spawn_blocking(move || render.run());

        let backend = render.await;

        // ── Shutdown ─────────────────────────────────────────────
        self.running.store(false, Ordering::SeqCst);

        if let Err(e) = event_pump.await {
            warn!("event pump task failed: {e}");
        }

        self.transport.disconnect();
        if let Err(e) = shm_pump.await {
            warn!("transport pump task failed: {e}");
        }

        if let Err(e) = remote_pump.await {
            warn!("remote pump task failed: {e}");
        }

        info!("pipeline stopped");
        backend.map_err(|e| KvmError::Other(format!("render task failed: {e}")))
    }
}

// ── Contexts ─────────────────────────────────────────────────────

fn pump_transport(transport: &dyn ShmTransport, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        if let Err(e) = transport.pump_messages() {
            if running.swap(false, Ordering::SeqCst) {
                error!("failed to process ivshmem messages: {e}");
            }
            break;
        }
    }
}

async fn pump_remote<P: RemotePump>(mut pump: P, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let result = tokio::select! {
            result = pump.pump_messages() => result,
            _ = wait_for_stop(&running) => break,
        };
        if let Err(e) = result {
            if running.swap(false, Ordering::SeqCst) {
                error!("failed to process remote messages: {e}");
            }
            break;
        }
    }
    pump.disconnect().await;
}

async fn pump_events<S: InputSource, R: RemoteInput>(
    mut forwarder: InputForwarder<S, R>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        forwarder.pump();
        tokio::time::sleep(interval).await;
    }
}

/// Resolve once `running` has been cleared.
pub async fn wait_for_stop(running: &AtomicBool) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
