//! Transport seam between the peer manager and a concrete WebRTC stack
//!
//! The peer manager drives negotiation through [`RtcConnection`] and talks
//! to the data channel through [`DataChannelIo`]. Everything the transport
//! reports asynchronously (ICE candidates, state changes, channel traffic)
//! arrives as a [`TransportEvent`] on one unbounded channel, so protocol
//! decisions are taken by whoever drains that channel rather than inside
//! transport callbacks.

use crate::channels::DataChannelFrame;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Peer connection lifecycle state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Data channel ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel is being created
    Connecting,
    /// Channel is open and ready for messages
    Open,
    /// Channel is closing
    Closing,
    /// Channel is closed
    Closed,
}

/// Events raised by the transport outside of any caller's await
pub enum TransportEvent {
    /// A local ICE candidate was gathered and should be signaled
    IceCandidate(IceCandidate),
    /// Aggregate peer connection state changed
    ConnectionStateChanged(ConnectionState),
    /// ICE agent state changed (advisory, for logging)
    IceConnectionStateChanged(String),
    /// The remote side opened a data channel on this connection
    RemoteDataChannel(Arc<dyn DataChannelIo>),
    /// A data channel reached the open state
    ChannelOpened { label: String },
    /// A data channel closed
    ChannelClosed { label: String },
    /// A data channel reported an error
    ChannelError { label: String, error: String },
    /// A frame arrived on a data channel
    ChannelMessage {
        label: String,
        frame: DataChannelFrame,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            TransportEvent::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            TransportEvent::IceConnectionStateChanged(s) => {
                f.debug_tuple("IceConnectionStateChanged").field(s).finish()
            }
            TransportEvent::RemoteDataChannel(dc) => {
                f.debug_tuple("RemoteDataChannel").field(&dc.label()).finish()
            }
            TransportEvent::ChannelOpened { label } => {
                f.debug_struct("ChannelOpened").field("label", label).finish()
            }
            TransportEvent::ChannelClosed { label } => {
                f.debug_struct("ChannelClosed").field("label", label).finish()
            }
            TransportEvent::ChannelError { label, error } => f
                .debug_struct("ChannelError")
                .field("label", label)
                .field("error", error)
                .finish(),
            TransportEvent::ChannelMessage { label, frame } => f
                .debug_struct("ChannelMessage")
                .field("label", label)
                .field("bytes", &frame.size())
                .finish(),
        }
    }
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// One bidirectional, reliable and ordered data channel
#[async_trait]
pub trait DataChannelIo: Send + Sync {
    fn label(&self) -> String;

    fn state(&self) -> ChannelState;

    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()>;

    async fn send_binary(&self, data: Bytes) -> Result<()>;

    /// Bytes queued locally but not yet handed to the network
    async fn buffered_amount(&self) -> usize;
}

/// One negotiated (or negotiating) direct transport connection
#[async_trait]
pub trait RtcConnection: Send + Sync {
    /// Create a local data channel; its events are reported on the
    /// connection's event sender
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelIo>>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Factory for transport connections
#[async_trait]
pub trait PeerBackend: Send + Sync {
    /// Build a new connection whose asynchronous events go to `events`
    async fn connect(&self, events: TransportEventSender) -> Result<Arc<dyn RtcConnection>>;
}
