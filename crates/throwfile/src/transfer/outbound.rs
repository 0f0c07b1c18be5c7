//! Files queued for sending

use crate::{Error, Result};
use bytes::Bytes;
use std::path::Path;

/// A file the local side wants to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub filename: String,
    pub data: Bytes,
}

impl OutboundFile {
    pub fn from_bytes(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk; only its final path component is announced
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidState(format!("{} has no usable file name", path.display()))
            })?
            .to_string();

        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(filename, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Lifecycle of an outbound transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// `file-info-request` sent (or about to be), awaiting a decision
    Requested,
    /// Receiver accepted; chunks may flow
    Accepted,
    /// Receiver declined
    Rejected,
    /// Chunks are being written
    Sending,
    /// `file-complete` sent
    Complete,
}

/// The single outbound slot
///
/// Occupied from the request until the receiver declines or the chunk
/// writer finishes.
#[derive(Debug)]
pub(crate) struct PendingOutbound {
    pub id: u64,
    pub file: OutboundFile,
    pub state: OutboundState,
}

impl PendingOutbound {
    pub fn new(id: u64, file: OutboundFile) -> Self {
        Self {
            id,
            file,
            state: OutboundState::Requested,
        }
    }

    /// Still waiting on the receiver for this filename
    pub fn awaits_decision_for(&self, filename: &str) -> bool {
        self.state == OutboundState::Requested && self.file.filename == filename
    }

    /// Accepted and not finished; bytes are or will be on the wire
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, OutboundState::Accepted | OutboundState::Sending)
    }
}
