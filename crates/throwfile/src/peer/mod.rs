//! Peer connection management
//!
//! - `backend`: transport seam traits and wire types
//! - `webrtc_backend`: the seam implemented on webrtc-rs
//! - `state`: connection state machine
//! - `ice`: remote candidates deferred until a remote description exists
//! - `manager`: the Peer Connection Manager

pub mod backend;
pub mod ice;
pub mod manager;
pub mod state;
pub mod webrtc_backend;

pub use backend::{
    ChannelState, ConnectionState, DataChannelIo, IceCandidate, PeerBackend, RtcConnection,
    SdpType, SessionDescription, TransportEvent, TransportEventSender,
};
pub use ice::PendingCandidates;
pub use manager::{
    ActiveChannel, ConnectionEvent, ConnectionEventReceiver, PeerConnectionManager, PeerUpdate,
};
pub use state::{PeerEvent, PeerState};
pub use webrtc_backend::WebRtcBackend;
