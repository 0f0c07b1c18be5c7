//! WebRTC data channel frames
//!
//! Control frames (JSON text) and chunk frames (binary) share one
//! reliable, ordered data channel.

pub mod messages;

pub use messages::{ControlFrame, DataChannelFrame};
