//! Relay signaling
//!
//! Both peers attach to the relay with the same channel identifier. The relay
//! forwards `{action, channel, type, payload}` envelopes to the other party
//! and synthesizes `peer_joined`/`peer_left` when connections come and go.

pub mod adapter;
pub mod client;
pub mod protocol;

pub use adapter::{SignalSink, SignalingAdapter, SignalingEvent};
pub use client::WebSocketSignaling;
pub use protocol::{InboundEnvelope, OutboundEnvelope, PeerPresence, Presence, SignalType};
