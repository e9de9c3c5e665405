//! Remote-display control protocol client.
//!
//! | Module    | Purpose                                          |
//! |-----------|--------------------------------------------------|
//! | `client`  | Connection, input sender and session pump        |
//! | `codec`   | `tag | len | bincode` framing                    |
//! | `message` | Client and server message enums                  |

pub mod client;
pub mod codec;
pub mod message;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

pub use client::{RemoteClient, RemoteSender, RemoteSession};
pub use codec::ControlCodec;
pub use message::{ClientMessage, ControlMessage, ServerMessage};

use crate::error::KvmError;

/// The maintenance side of a remote session.
#[async_trait]
pub trait RemotePump: Send {
    /// Receive and handle one server message.
    async fn pump_messages(&mut self) -> Result<(), KvmError>;

    /// Whether the server has accepted the session.
    fn is_ready(&self) -> bool;

    /// Close the session. Further input sends fail.
    async fn disconnect(&mut self);
}

/// Pump until the server reports ready or `running` is cleared.
pub async fn wait_until_ready<P: RemotePump + ?Sized>(pump: &mut P, running: &AtomicBool) -> Result<(), KvmError> {
    while running.load(Ordering::SeqCst) && !pump.is_ready() {
        pump.pump_messages().await?;
    }
    Ok(())
}
