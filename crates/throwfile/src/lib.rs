//! Direct peer-to-peer file transfer over WebRTC data channels
//!
//! Two peers sharing a six-character channel identifier find each other
//! through a signaling relay, negotiate a WebRTC connection and stream files
//! to each other with per-file consent and progress reporting.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Session (single event loop)                         │
//! │  ├─ SignalingAdapter ── WebSocket ── relay           │
//! │  ├─ PeerConnectionManager                            │
//! │  │   ├─ PeerState transition table                   │
//! │  │   ├─ PendingCandidates (ICE before remote SDP)    │
//! │  │   └─ PeerBackend (webrtc-rs)                      │
//! │  └─ TransferCoordinator                              │
//! │      └─ 64 KiB chunks over the data channel          │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use throwfile::{ChannelId, SessionConfig};
//!
//! let config = SessionConfig {
//!     signaling_url: "wss://relay.example.org/prod".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//!
//! let channel = ChannelId::parse("ab-12-cd").unwrap();
//! assert_eq!(channel.as_str(), "AB12CD");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use throwfile::{ChannelId, OutboundFile, Session, SessionConfig};
//!
//! # async fn example() -> throwfile::Result<()> {
//! let config = SessionConfig::default();
//! let (session, mut events) = Session::connect(config, ChannelId::generate()).await?;
//! session.join().await?;
//!
//! let file = OutboundFile::from_path("notes.txt").await?;
//! session.send_file(file).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channel_id;
pub mod channels;
pub mod config;
pub mod error;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transfer;

pub use channel_id::ChannelId;
pub use config::{SessionConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use peer::{ConnectionState, PeerConnectionManager, PeerState};
pub use session::{Session, SessionEvent};
pub use signaling::{SignalingAdapter, WebSocketSignaling};
pub use transfer::{
    Direction, IncomingFile, OutboundFile, ReceivedFile, TransferCoordinator, TransferEvent,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
