//! # kvmgfx-client — VGA passthrough receiver
//!
//! Runs on the **host**. Maps the frame region shared by the guest,
//! draws every frame it is signalled, and forwards local keyboard and
//! mouse input to the guest over the remote-display control protocol.

pub mod config;
pub mod logging;
pub mod viewer;
