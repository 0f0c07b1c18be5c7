//! Signaling adapter
//!
//! Serializes outbound envelopes for one channel and decodes inbound ones
//! into typed events. Holds no protocol state.

use super::protocol::{InboundEnvelope, OutboundEnvelope, PeerPresence, Presence, SignalType};
use crate::channel_id::ChannelId;
use crate::peer::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where serialized outbound envelopes go (a WebSocket, or a test relay)
pub trait SignalSink: Send + Sync {
    fn deliver(&self, text: String) -> Result<()>;

    /// Release the underlying relay connection
    fn close(&self) {}
}

/// Inbound signaling message after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Join {
        from: Option<String>,
        presence: Presence,
    },
    PeerJoined(PeerPresence),
    Ready {
        from: Option<String>,
        presence: Presence,
    },
    Offer(SessionDescription),
    Answer(SessionDescription),
    Ice(IceCandidate),
    PeerLeft(PeerPresence),
}

impl SignalingEvent {
    pub fn kind(&self) -> SignalType {
        match self {
            SignalingEvent::Join { .. } => SignalType::Join,
            SignalingEvent::PeerJoined(_) => SignalType::PeerJoined,
            SignalingEvent::Ready { .. } => SignalType::Ready,
            SignalingEvent::Offer(_) => SignalType::Offer,
            SignalingEvent::Answer(_) => SignalType::Answer,
            SignalingEvent::Ice(_) => SignalType::Ice,
            SignalingEvent::PeerLeft(_) => SignalType::PeerLeft,
        }
    }
}

/// Outbound half of the relay connection, scoped to one channel
#[derive(Clone)]
pub struct SignalingAdapter {
    channel: ChannelId,
    sink: Arc<dyn SignalSink>,
}

impl SignalingAdapter {
    pub fn new(channel: ChannelId, sink: Arc<dyn SignalSink>) -> Self {
        Self { channel, sink }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Wrap `payload` in an envelope for this channel and hand it to the relay
    pub fn send(&self, kind: SignalType, payload: &impl Serialize) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        let envelope = OutboundEnvelope::new(self.channel.clone(), kind, payload);
        let text = serde_json::to_string(&envelope)?;
        debug!(channel = %self.channel, %kind, "Sending signaling message");
        self.sink.deliver(text)
    }

    /// Decode one relay frame
    ///
    /// Returns `Ok(None)` for well-formed envelopes whose type this client
    /// does not handle, and `SignalingDelivery` for malformed ones.
    pub fn decode(text: &str) -> Result<Option<SignalingEvent>> {
        let envelope: InboundEnvelope = serde_json::from_str(text)
            .map_err(|e| Error::SignalingDelivery(format!("Malformed envelope: {}", e)))?;

        let Some(kind) = SignalType::parse(&envelope.kind) else {
            warn!("Unhandled signaling message type: {}", envelope.kind);
            return Ok(None);
        };

        let event = match kind {
            SignalType::Join => SignalingEvent::Join {
                from: envelope.from,
                presence: lenient(envelope.payload),
            },
            SignalType::Ready => SignalingEvent::Ready {
                from: envelope.from,
                presence: lenient(envelope.payload),
            },
            SignalType::PeerJoined => SignalingEvent::PeerJoined(lenient(envelope.payload)),
            SignalType::PeerLeft => SignalingEvent::PeerLeft(lenient(envelope.payload)),
            SignalType::Offer => SignalingEvent::Offer(strict(kind, envelope.payload)?),
            SignalType::Answer => SignalingEvent::Answer(strict(kind, envelope.payload)?),
            SignalType::Ice => {
                // Browsers signal end-of-candidates as a null candidate
                if envelope.payload.is_null() {
                    debug!("Ignoring empty ICE candidate");
                    return Ok(None);
                }
                SignalingEvent::Ice(strict(kind, envelope.payload)?)
            }
        };

        Ok(Some(event))
    }
}

fn lenient<T: DeserializeOwned + Default>(payload: Value) -> T {
    serde_json::from_value(payload).unwrap_or_default()
}

fn strict<T: DeserializeOwned>(kind: SignalType, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| Error::SignalingDelivery(format!("Invalid {} payload: {}", kind, e)))
}
