//! Transfer Coordinator
//!
//! Per-file consent handshake and chunked streaming over the session's data
//! channel. One outbound and one inbound transfer may be in flight at a time.

pub mod chunker;
pub mod coordinator;
pub mod inbound;
pub mod outbound;

pub use chunker::{percent, CHUNK_SIZE};
pub use coordinator::{Direction, IncomingFile, TransferCoordinator, TransferEvent};
pub use inbound::{InboundTransfer, ReceivedFile};
pub use outbound::{OutboundFile, OutboundState};
