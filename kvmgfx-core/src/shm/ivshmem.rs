//! ivshmem-server client.
//!
//! ## Wire format
//!
//! Every server message is one host-endian `i64` with an optional file
//! descriptor attached as `SCM_RIGHTS`:
//!
//! ```text
//! 1. protocol version   (0, no fd)
//! 2. our peer id        (no fd)
//! 3. shared memory      (-1, fd = shm object)
//! 4. peer id + eventfd  (one message per interrupt vector, ours included)
//! 5. peer id, no fd     (peer disconnected)
//! ```
//!
//! Steps 1–3 happen in [`IvshmemClient::connect`]; everything after is
//! handled by [`pump_messages`](ShmTransport::pump_messages).

use std::collections::HashMap;
use std::fs::File;
use std::io::{IoSliceMut, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use memmap2::{Mmap, MmapMut};
use nix::poll::{PollFd, PollFlags, poll};
use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ShmTransport, WaitResult};
use crate::error::KvmError;
use crate::header::{HEADER_SIZE, HOST_ID_OFFSET};

// ── Constants ────────────────────────────────────────────────────

/// The only server protocol revision we speak.
const IVSHMEM_PROTOCOL_VERSION: i64 = 0;

/// Poll granularity while waiting, bounds how long a disconnect takes to
/// reach a blocked wait.
const WAIT_SLICE: Duration = Duration::from_millis(50);

// ── IvshmemClient ────────────────────────────────────────────────

/// A connected ivshmem peer with the shared region mapped.
pub struct IvshmemClient {
    socket: UnixStream,
    id: u16,
    mapping: Mmap,
    /// Interrupt eventfds per peer, indexed by vector. Our own entry
    /// holds the fds we wait on.
    peers: Mutex<HashMap<u16, Vec<Arc<File>>>>,
    cancel: CancellationToken,
    wait_timeout: Duration,
}

impl IvshmemClient {
    /// Connect to the server socket and map the shared region.
    ///
    /// Our peer id is written into the header's `host_id` field before
    /// the mapping is made read-only.
    pub fn connect(path: impl AsRef<Path>, wait_timeout: Duration) -> Result<Self, KvmError> {
        let path = path.as_ref();
        let socket = UnixStream::connect(path)?;
        info!("connected to ivshmem server at {}", path.display());

        let (version, _) = recv_message(socket.as_raw_fd())?;
        if version != IVSHMEM_PROTOCOL_VERSION {
            return Err(KvmError::Transport(format!("unsupported ivshmem protocol version {version}")));
        }

        let (id, _) = recv_message(socket.as_raw_fd())?;
        let id = peer_id(id)?;

        let (marker, fd) = recv_message(socket.as_raw_fd())?;
        let shm = match (marker, fd) {
            (-1, Some(fd)) => File::from(fd),
            _ => return Err(KvmError::ProtocolViolation("expected shared memory descriptor")),
        };

        // SAFETY: the region is shared with the guest by design; the
        // host only reads it after this point.
        let mut map = unsafe { MmapMut::map_mut(&shm)? };
        if map.len() < HEADER_SIZE {
            return Err(KvmError::RegionTooShort {
                expected: HEADER_SIZE,
                actual: map.len(),
            });
        }
        map[HOST_ID_OFFSET..HOST_ID_OFFSET + 2].copy_from_slice(&id.to_le_bytes());
        let mapping = map.make_read_only()?;
        info!("mapped {} bytes of shared memory, host id {id}", mapping.len());

        Ok(Self {
            socket,
            id,
            mapping,
            peers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            wait_timeout,
        })
    }

    /// Number of interrupt vectors known for `peer`.
    pub fn vectors(&self, peer: u16) -> usize {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)
            .map_or(0, Vec::len)
    }

    fn eventfd(&self, peer: u16, vector: u16) -> Option<Arc<File>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)?
            .get(vector as usize)
            .cloned()
    }

    fn poll_readable(fd: &File, timeout: Duration) -> Result<bool, std::io::Error> {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let ready = poll(&mut fds, millis)?;
        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "eventfd hung up"));
        }
        Ok(ready > 0)
    }
}

impl ShmTransport for IvshmemClient {
    fn mapping(&self) -> Option<&[u8]> {
        Some(&self.mapping[..])
    }

    fn local_id(&self) -> u16 {
        self.id
    }

    fn wait_for_interrupt(&self, vector: u16) -> WaitResult {
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            if self.cancel.is_cancelled() {
                return WaitResult::Error;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitResult::Timeout;
            }
            let slice = remaining.min(WAIT_SLICE);

            let Some(fd) = self.eventfd(self.id, vector) else {
                // our doorbells have not been announced yet
                std::thread::sleep(slice);
                continue;
            };

            match Self::poll_readable(&fd, slice) {
                Ok(false) => continue,
                Ok(true) => {
                    let mut counter = [0u8; 8];
                    return match (&*fd).read_exact(&mut counter) {
                        Ok(()) => WaitResult::Ready,
                        Err(e) => {
                            warn!("failed to read interrupt vector {vector}: {e}");
                            WaitResult::Error
                        }
                    };
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("failed to poll interrupt vector {vector}: {e}");
                    return WaitResult::Error;
                }
            }
        }
    }

    fn kick_interrupt(&self, peer: u16, vector: u16) -> Result<(), KvmError> {
        let fd = self.eventfd(peer, vector).ok_or(KvmError::UnknownPeer { peer, vector })?;
        (&*fd).write_all(&1u64.to_ne_bytes())?;
        Ok(())
    }

    fn pump_messages(&self) -> Result<(), KvmError> {
        if self.cancel.is_cancelled() {
            return Err(KvmError::Transport("disconnected".into()));
        }

        let (raw_id, fd) = recv_message(self.socket.as_raw_fd())?;
        let id = peer_id(raw_id)?;
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);

        match fd {
            Some(fd) => {
                let vectors = peers.entry(id).or_default();
                vectors.push(Arc::new(File::from(fd)));
                debug!("peer {id} vector {} registered", vectors.len() - 1);
            }
            None => {
                if peers.remove(&id).is_some() {
                    info!("peer {id} disconnected");
                }
                if id == self.id {
                    return Err(KvmError::Transport("server removed this peer".into()));
                }
            }
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.cancel.cancel();
        // unblocks a pump sitting in recvmsg
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            debug!("ivshmem socket shutdown: {e}");
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn peer_id(raw: i64) -> Result<u16, KvmError> {
    u16::try_from(raw).map_err(|_| KvmError::UnknownVariant {
        type_name: "ivshmem peer id",
        value: raw as u64,
    })
}

/// Receive one `i64` message and the descriptor attached to it, if any.
fn recv_message(socket: RawFd) -> Result<(i64, Option<OwnedFd>), KvmError> {
    let mut buf = [0u8; 8];
    let mut cmsg = nix::cmsg_space!(RawFd);

    let (bytes, fd) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(socket, &mut iov, Some(&mut cmsg), MsgFlags::empty())?;

        let mut fd = None;
        for c in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(fds) = c {
                for raw in fds {
                    // SAFETY: SCM_RIGHTS hands us fresh descriptors we now own.
                    let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                    if fd.is_none() {
                        fd = Some(owned);
                    }
                }
            }
        }
        (msg.bytes, fd)
    };

    match bytes {
        0 => Err(KvmError::Transport("ivshmem server closed the connection".into())),
        8 => Ok((i64::from_ne_bytes(buf), fd)),
        _ => Err(KvmError::ProtocolViolation("short ivshmem message")),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{ControlMessage, sendmsg};
    use std::io::IoSlice;
    use std::os::unix::net::UnixListener;

    fn send(stream: &UnixStream, value: i64, fd: Option<RawFd>) {
        let bytes = value.to_ne_bytes();
        let iov = [IoSlice::new(&bytes)];
        let fds;
        let cmsgs: Vec<ControlMessage<'_>> = match fd {
            Some(raw) => {
                fds = [raw];
                vec![ControlMessage::ScmRights(&fds)]
            }
            None => Vec::new(),
        };
        sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None).unwrap();
    }

    #[test]
    fn handshake_maps_region_and_registers_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("ivshmem.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let shm_path = dir.path().join("shm");
        let shm = File::options().read(true).write(true).create(true).truncate(true).open(&shm_path).unwrap();
        shm.set_len(4096).unwrap();
        let (own_tx, own_rx) = UnixStream::pair().unwrap();
        let (peer_tx, _peer_rx) = UnixStream::pair().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            send(&stream, 0, None);
            send(&stream, 3, None);
            send(&stream, -1, Some(shm.as_raw_fd()));
            send(&stream, 5, Some(peer_tx.as_raw_fd()));
            send(&stream, 3, Some(own_rx.as_raw_fd()));
            (stream, own_tx)
        });

        let client = IvshmemClient::connect(&socket, Duration::from_millis(100)).unwrap();
        let (_stream, own_tx) = server.join().unwrap();

        assert_eq!(client.local_id(), 3);
        let region = client.mapping().unwrap();
        assert_eq!(region.len(), 4096);
        assert_eq!(&region[HOST_ID_OFFSET..HOST_ID_OFFSET + 2], &3u16.to_le_bytes());

        client.pump_messages().unwrap();
        client.pump_messages().unwrap();
        assert_eq!(client.vectors(5), 1);
        assert_eq!(client.vectors(3), 1);

        // nothing rung yet: the poll runs out the whole timeout
        assert_eq!(client.wait_for_interrupt(0), WaitResult::Timeout);

        // a guest write on our doorbell makes the wait ready
        (&own_tx).write_all(&1u64.to_ne_bytes()).unwrap();
        assert_eq!(client.wait_for_interrupt(0), WaitResult::Ready);

        client.disconnect();
        assert_eq!(client.wait_for_interrupt(0), WaitResult::Error);
        assert!(client.pump_messages().is_err());
    }

    #[test]
    fn peer_ids_must_fit_u16() {
        assert!(matches!(peer_id(-5), Err(KvmError::UnknownVariant { .. })));
        assert_eq!(peer_id(42).unwrap(), 42);
    }
}
