//! TCP client for the remote-display control protocol.
//!
//! Connecting splits the framed stream: outbound messages go through an
//! mpsc channel drained by a writer task, so [`RemoteSender`] never
//! blocks the caller; inbound messages are read by [`RemoteSession`]'s
//! pump.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::RemotePump;
use super::codec::ControlCodec;
use super::message::{ClientMessage, ServerMessage};
use crate::error::KvmError;
use crate::input::RemoteInput;

type ControlStream = Framed<TcpStream, ControlCodec<ServerMessage>>;

// ── RemoteClient ─────────────────────────────────────────────────

pub struct RemoteClient;

impl RemoteClient {
    /// Connect and send the greeting.
    ///
    /// The session is not ready until the server answers; see
    /// [`wait_until_ready`](super::wait_until_ready).
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        timeout: Duration,
    ) -> Result<(RemoteSender, RemoteSession), KvmError> {
        info!("connecting to remote display at {host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| KvmError::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        let framed: ControlStream = Framed::new(stream, ControlCodec::new());
        let (sink, reader) = framed.split::<ClientMessage>();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(sink, rx, cancel.clone()));

        tx.send(ClientMessage::Hello {
            password: password.to_string(),
        })?;

        Ok((
            RemoteSender { tx: tx.clone() },
            RemoteSession {
                reader,
                tx,
                ready: Arc::new(AtomicBool::new(false)),
                cancel,
                writer: Some(writer),
            },
        ))
    }
}

async fn write_loop(
    mut sink: SplitSink<ControlStream, ClientMessage>,
    mut rx: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(m) => m,
                None => break,
            },
        };
        trace!("-> {message:?}");
        if let Err(e) = sink.send(message).await {
            warn!("remote write error: {e}");
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("remote close: {e}");
    }
}

// ── RemoteSender ─────────────────────────────────────────────────

/// Cloneable input side of a session.
#[derive(Debug, Clone)]
pub struct RemoteSender {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl RemoteSender {
    pub fn send(&self, message: ClientMessage) -> Result<(), KvmError> {
        self.tx.send(message)?;
        Ok(())
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl RemoteInput for RemoteSender {
    fn set_pointer_mode(&self, relative: bool) -> Result<(), KvmError> {
        self.send(ClientMessage::SetPointerMode { relative })
    }

    fn key_down(&self, code: u32) -> Result<(), KvmError> {
        self.send(ClientMessage::KeyDown(code))
    }

    fn key_up(&self, code: u32) -> Result<(), KvmError> {
        self.send(ClientMessage::KeyUp(code))
    }

    fn pointer_move(&self, dx: i32, dy: i32) -> Result<(), KvmError> {
        self.send(ClientMessage::PointerMove { dx, dy })
    }

    fn pointer_set_position(&self, x: i32, y: i32) -> Result<(), KvmError> {
        self.send(ClientMessage::PointerPosition { x, y })
    }

    fn button_press(&self, button: u8) -> Result<(), KvmError> {
        self.send(ClientMessage::ButtonPress(button))
    }

    fn button_release(&self, button: u8) -> Result<(), KvmError> {
        self.send(ClientMessage::ButtonRelease(button))
    }
}

// ── RemoteSession ────────────────────────────────────────────────

/// Receiving side of a session, driven by the remote pump.
pub struct RemoteSession {
    reader: SplitStream<ControlStream>,
    tx: mpsc::UnboundedSender<ClientMessage>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
}

#[async_trait]
impl RemotePump for RemoteSession {
    async fn pump_messages(&mut self) -> Result<(), KvmError> {
        if self.cancel.is_cancelled() {
            return Err(KvmError::RemoteClosed);
        }

        let message = match self.reader.next().await {
            Some(result) => result?,
            None => return Err(KvmError::RemoteClosed),
        };
        trace!("<- {message:?}");

        match message {
            ServerMessage::Ready => {
                if !self.ready.swap(true, Ordering::SeqCst) {
                    info!("remote session ready");
                }
            }
            ServerMessage::Denied { reason } => {
                return Err(KvmError::Other(format!("remote session refused: {reason}")));
            }
            ServerMessage::Ping(n) => self.tx.send(ClientMessage::Pong(n))?,
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) {
        self.cancel.cancel();
        self.ready.store(false, Ordering::SeqCst);
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                warn!("remote writer task failed: {e}");
            }
        }
        info!("remote session closed");
    }
}

// ── Tests ────────────────────────────────────────────────────────
