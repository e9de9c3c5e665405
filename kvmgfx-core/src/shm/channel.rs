//! The shared frame channel.
//!
//! Gates frame processing on a valid, versioned region and implements
//! the producer/consumer handshake:
//!
//! ```text
//! host                               guest
//!  │ wait_for_interrupt ◄─────────── kick (frame ready)
//!  │   timeout → kick ─────────────► (prompt)
//!  │ decode + submit
//!  │ acknowledge: kick ────────────► buffer may be reused
//! ```
//!
//! There is no double buffering here: the guest must not touch the
//! payload until the acknowledgement, so decode has to finish first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use super::{ShmTransport, WaitResult};
use crate::error::KvmError;
use crate::header::{self, FrameHeader};
use crate::input::GuestCursor;

/// Outcome of [`SharedFrameChannel::wait_for_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWait {
    /// A frame is available; the header as written for it.
    Ready(FrameHeader),
    /// The region is unmapped, has no magic yet, or an unsupported
    /// version. Not an error: try again next pass.
    NotReady,
    /// The running flag was cleared while waiting.
    Stopped,
}

/// Host end of the frame handshake.
pub struct SharedFrameChannel {
    transport: Arc<dyn ShmTransport>,
    running: Arc<AtomicBool>,
    vector: u16,
    timeout_kicks: u64,
}

impl SharedFrameChannel {
    /// Create a channel on interrupt vector 0.
    pub fn new(transport: Arc<dyn ShmTransport>, running: Arc<AtomicBool>) -> Self {
        Self {
            transport,
            running,
            vector: 0,
            timeout_kicks: 0,
        }
    }

    /// Use a different interrupt vector.
    pub fn with_vector(mut self, vector: u16) -> Self {
        self.vector = vector;
        self
    }

    /// The live header, if the region is mapped and initialised.
    pub fn header(&self) -> Option<FrameHeader> {
        let region = self.transport.mapping()?;
        let header = FrameHeader::read(region).ok()?;
        header.is_ready().then_some(header)
    }

    /// The live payload following the header.
    pub fn payload(&self) -> &[u8] {
        self.transport.mapping().map(header::payload).unwrap_or(&[])
    }

    /// Kicks issued because a wait timed out, over the channel's lifetime.
    pub fn timeout_kicks(&self) -> u64 {
        self.timeout_kicks
    }

    /// Block until the guest signals a frame.
    ///
    /// A timed-out wait re-kicks the guest and keeps waiting. A transport
    /// error is fatal and returned to the caller.
    pub fn wait_for_frame(&mut self) -> Result<FrameWait, KvmError> {
        let Some(header) = self.header() else {
            return Ok(FrameWait::NotReady);
        };

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(FrameWait::Stopped);
            }

            match self.transport.wait_for_interrupt(self.vector) {
                WaitResult::Ready => break,
                WaitResult::Timeout => {
                    self.timeout_kicks += 1;
                    trace!("wait timed out, prompting guest {}", header.guest_id);
                    if let Err(e) = self.transport.kick_interrupt(header.guest_id, self.vector) {
                        debug!("prompt kick to guest {} failed: {e}", header.guest_id);
                    }
                }
                WaitResult::Error => {
                    return Err(KvmError::Transport("error during wait for host".into()));
                }
            }
        }

        // The guest rewrote the header alongside the frame.
        Ok(match self.header() {
            Some(live) => FrameWait::Ready(live),
            None => FrameWait::NotReady,
        })
    }

    /// Release the payload back to the guest.
    pub fn acknowledge(&self, guest_id: u16) -> Result<(), KvmError> {
        self.transport.kick_interrupt(guest_id, self.vector).inspect_err(|e| {
            warn!("failed to acknowledge frame to guest {guest_id}: {e}");
        })
    }
}

// ── HeaderCursor ─────────────────────────────────────────────────

/// Reads the guest pointer position straight from the live header.
pub struct HeaderCursor {
    transport: Arc<dyn ShmTransport>,
}

impl HeaderCursor {
    pub fn new(transport: Arc<dyn ShmTransport>) -> Self {
        Self { transport }
    }
}

impl GuestCursor for HeaderCursor {
    fn position(&self) -> (i32, i32) {
        self.transport
            .mapping()
            .and_then(|region| FrameHeader::read(region).ok())
            .map_or((0, 0), |header| header.cursor())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{CompType, FrameType, HEADER_SIZE};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedTransport {
        region: Vec<u8>,
        waits: Mutex<VecDeque<WaitResult>>,
        kicks: Mutex<Vec<(u16, u16)>>,
    }

    impl ScriptedTransport {
        fn new(header: Option<FrameHeader>, waits: &[WaitResult]) -> Self {
            let mut region = vec![0u8; HEADER_SIZE + 16];
            if let Some(h) = header {
                region[..HEADER_SIZE].copy_from_slice(&h.encode());
            }
            Self {
                region,
                waits: Mutex::new(waits.iter().copied().collect()),
                kicks: Mutex::new(Vec::new()),
            }
        }
    }

    impl ShmTransport for ScriptedTransport {
        fn mapping(&self) -> Option<&[u8]> {
            Some(&self.region)
        }
        fn local_id(&self) -> u16 {
            1
        }
        fn wait_for_interrupt(&self, _vector: u16) -> WaitResult {
            self.waits.lock().unwrap().pop_front().unwrap_or(WaitResult::Error)
        }
        fn kick_interrupt(&self, peer: u16, vector: u16) -> Result<(), KvmError> {
            self.kicks.lock().unwrap().push((peer, vector));
            Ok(())
        }
        fn pump_messages(&self) -> Result<(), KvmError> {
            Ok(())
        }
        fn disconnect(&self) {}
    }

    fn valid_header() -> FrameHeader {
        let mut h = FrameHeader::new(FrameType::Rgb, CompType::None, 4, 4, 4);
        h.guest_id = 7;
        h
    }

    fn channel(transport: Arc<ScriptedTransport>) -> SharedFrameChannel {
        SharedFrameChannel::new(transport, Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn timeouts_prompt_the_guest() {
        let waits = [WaitResult::Timeout, WaitResult::Timeout, WaitResult::Timeout, WaitResult::Ready];
        let transport = Arc::new(ScriptedTransport::new(Some(valid_header()), &waits));
        let mut ch = channel(transport.clone());

        assert_eq!(ch.wait_for_frame().unwrap(), FrameWait::Ready(valid_header()));
        assert_eq!(ch.timeout_kicks(), 3);
        assert_eq!(*transport.kicks.lock().unwrap(), vec![(7, 0); 3]);
    }

    #[test]
    fn wait_error_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(Some(valid_header()), &[WaitResult::Error]));
        let mut ch = channel(transport.clone());
        assert!(matches!(ch.wait_for_frame(), Err(KvmError::Transport(_))));
        assert!(transport.kicks.lock().unwrap().is_empty());
    }

    #[test]
    fn uninitialised_region_is_skipped() {
        let transport = Arc::new(ScriptedTransport::new(None, &[WaitResult::Ready]));
        let mut ch = channel(transport.clone());
        assert_eq!(ch.wait_for_frame().unwrap(), FrameWait::NotReady);
        // the wait was never attempted
        assert_eq!(transport.waits.lock().unwrap().len(), 1);
    }

    #[test]
    fn wrong_version_is_skipped() {
        let mut h = valid_header();
        h.version = 1;
        let transport = Arc::new(ScriptedTransport::new(Some(h), &[WaitResult::Ready]));
        assert_eq!(channel(transport).wait_for_frame().unwrap(), FrameWait::NotReady);
    }

    #[test]
    fn cleared_flag_stops_waiting() {
        let transport = Arc::new(ScriptedTransport::new(Some(valid_header()), &[]));
        let running = Arc::new(AtomicBool::new(false));
        let mut ch = SharedFrameChannel::new(transport, running);
        assert_eq!(ch.wait_for_frame().unwrap(), FrameWait::Stopped);
    }

    #[test]
    fn acknowledge_kicks_guest() {
        let transport = Arc::new(ScriptedTransport::new(Some(valid_header()), &[]));
        let ch = channel(transport.clone()).with_vector(2);
        ch.acknowledge(7).unwrap();
        assert_eq!(*transport.kicks.lock().unwrap(), vec![(7, 2)]);
        assert_eq!(ch.payload().len(), 16);
    }

    #[test]
    fn header_cursor_reads_guest_position() {
        let mut h = valid_header();
        h.mouse_x = 320;
        h.mouse_y = -4;
        let cursor = HeaderCursor::new(Arc::new(ScriptedTransport::new(Some(h), &[])));
        assert_eq!(cursor.position(), (320, -4));
    }
}
