//! Relay envelope types
//!
//! Outbound: `{"action":"sendMessage","channel":"AB12CD","type":"offer","payload":{...}}`
//! Inbound:  `{"type":"offer","from":"<connection id>","payload":{...}}`

use crate::channel_id::ChannelId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Signaling message types understood by both peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Join,
    PeerJoined,
    Ready,
    Offer,
    Answer,
    Ice,
    PeerLeft,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Join => "join",
            SignalType::PeerJoined => "peer_joined",
            SignalType::Ready => "ready",
            SignalType::Offer => "offer",
            SignalType::Answer => "answer",
            SignalType::Ice => "ice",
            SignalType::PeerLeft => "peer_left",
        }
    }

    /// Parse a wire type name; `None` for types this client does not handle
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "join" => Some(SignalType::Join),
            "peer_joined" => Some(SignalType::PeerJoined),
            "ready" => Some(SignalType::Ready),
            "offer" => Some(SignalType::Offer),
            "answer" => Some(SignalType::Answer),
            "ice" => Some(SignalType::Ice),
            "peer_left" => Some(SignalType::PeerLeft),
            _ => None,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope sent to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub action: String,
    pub channel: ChannelId,
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub payload: Value,
}

impl OutboundEnvelope {
    pub const ACTION: &'static str = "sendMessage";

    pub fn new(channel: ChannelId, kind: SignalType, payload: Value) -> Self {
        Self {
            action: Self::ACTION.to_string(),
            channel,
            kind,
            payload,
        }
    }
}

/// Envelope delivered by the relay
///
/// `type` stays a string so unknown types can be logged and skipped instead
/// of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Payload of `join` and `ready`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub ts: u64,
    /// Tie-break identity; absent when the remote is a browser peer
    #[serde(rename = "peerId", default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

impl Presence {
    pub fn now(peer_id: &str) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            ts,
            peer_id: Some(peer_id.to_string()),
        }
    }
}

/// Payload of relay-synthesized `peer_joined` and `peer_left`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPresence {
    #[serde(
        rename = "connectionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_id: Option<String>,
}
