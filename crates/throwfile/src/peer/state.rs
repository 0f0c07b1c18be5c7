//! Peer connection state machine
//!
//! ```text
//! Idle --Init--> Initialized --LocalOffer|RemoteOffer--> Negotiating
//! Negotiating --TransportConnected--> Connected
//! * --TransportFailed--> Failed
//! * --TransportClosed|Close--> Closed
//! Closed|Failed --Init--> Initialized
//! ```
//!
//! Transitions are a pure function of `(state, event)`; the manager applies
//! them and logs the pairs the table does not define.

use super::backend::ConnectionState;
use std::fmt;

/// Protocol state of the single per-session peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// No connection exists
    Idle,
    /// Connection and local data channel exist, nothing negotiated
    Initialized,
    /// At least one session description has been exchanged
    Negotiating,
    /// Transport reports the connection as established
    Connected,
    /// Closed by transport or explicitly; needs a fresh `init`
    Closed,
    /// Transport failure; needs a fresh `init`
    Failed,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEvent {
    Init,
    LocalOffer,
    RemoteOffer,
    RemoteAnswer,
    TransportConnecting,
    TransportConnected,
    TransportDisconnected,
    TransportFailed,
    TransportClosed,
    Close,
}

impl PeerEvent {
    /// Map a transport-reported connection state to an FSM input
    pub fn from_connection_state(state: ConnectionState) -> Option<Self> {
        match state {
            ConnectionState::New => None,
            ConnectionState::Connecting => Some(PeerEvent::TransportConnecting),
            ConnectionState::Connected => Some(PeerEvent::TransportConnected),
            ConnectionState::Disconnected => Some(PeerEvent::TransportDisconnected),
            ConnectionState::Failed => Some(PeerEvent::TransportFailed),
            ConnectionState::Closed => Some(PeerEvent::TransportClosed),
        }
    }
}

impl PeerState {
    /// Transition table. `None` means the event is not valid in this state.
    pub fn next(self, event: PeerEvent) -> Option<PeerState> {
        use PeerEvent as E;
        use PeerState as S;

        match (self, event) {
            (S::Idle, E::Init) => Some(S::Initialized),
            (S::Closed | S::Failed, E::Init) => Some(S::Initialized),

            (S::Initialized, E::LocalOffer | E::RemoteOffer) => Some(S::Negotiating),
            (S::Initialized, E::TransportConnecting) => Some(S::Negotiating),
            (S::Negotiating, E::LocalOffer | E::RemoteOffer | E::RemoteAnswer) => {
                Some(S::Negotiating)
            }
            (S::Negotiating, E::TransportConnecting) => Some(S::Negotiating),
            (S::Initialized | S::Negotiating, E::TransportConnected) => Some(S::Connected),

            // Advisory only: the transport may recover on its own.
            (S::Negotiating | S::Connected, E::TransportDisconnected) => Some(self),
            (S::Connected, E::TransportConnecting | E::TransportConnected) => Some(S::Connected),

            (S::Initialized | S::Negotiating | S::Connected, E::TransportFailed) => Some(S::Failed),
            (
                S::Initialized | S::Negotiating | S::Connected | S::Failed,
                E::TransportClosed | E::Close,
            ) => Some(S::Closed),
            (S::Closed, E::TransportClosed | E::Close) => Some(S::Closed),

            _ => None,
        }
    }

    /// A connection object exists and has not been torn down
    pub fn has_live_connection(self) -> bool {
        matches!(
            self,
            PeerState::Initialized | PeerState::Negotiating | PeerState::Connected
        )
    }

    /// Terminal until the next `init`
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
