//! Control messages exchanged with the remote-display server.

use serde::{Deserialize, Serialize};

/// A message family with its own frame tag.
pub trait ControlMessage {
    const TAG: u8;
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// First message on a connection.
    Hello { password: String },
    SetPointerMode { relative: bool },
    KeyDown(u32),
    KeyUp(u32),
    PointerMove { dx: i32, dy: i32 },
    PointerPosition { x: i32, y: i32 },
    ButtonPress(u8),
    ButtonRelease(u8),
    /// Answer to [`ServerMessage::Ping`].
    Pong(u64),
}

impl ControlMessage for ClientMessage {
    const TAG: u8 = 0x01;
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// The session accepts input from now on.
    Ready,
    /// The password was refused.
    Denied { reason: String },
    Ping(u64),
}

impl ControlMessage for ServerMessage {
    const TAG: u8 = 0x02;
}
