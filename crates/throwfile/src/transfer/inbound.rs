//! Reassembly of the file currently being received

use super::chunker::percent;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};

/// A file being received; chunks are kept in arrival order
#[derive(Debug)]
pub struct InboundTransfer {
    filename: String,
    expected_size: u64,
    chunks: Vec<Bytes>,
    received: u64,
}

impl InboundTransfer {
    pub fn new(filename: impl Into<String>, expected_size: u64) -> Self {
        Self {
            filename: filename.into(),
            expected_size,
            chunks: Vec::new(),
            received: 0,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    /// Append one chunk and return the receive progress
    pub fn push(&mut self, chunk: Bytes) -> u8 {
        self.received += chunk.len() as u64;
        self.chunks.push(chunk);
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        percent(self.received, self.expected_size)
    }

    /// Concatenate the chunks into the delivered artifact
    pub fn finish(self) -> ReceivedFile {
        let mut data = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }
        ReceivedFile {
            filename: self.filename,
            data: data.freeze(),
        }
    }
}

/// A completely received file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub filename: String,
    pub data: Bytes,
}

impl ReceivedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Final path component of the announced name, if it has a usable one
    ///
    /// The name comes from the remote peer, so directory parts and `..` are
    /// never honored.
    pub fn safe_name(&self) -> Option<String> {
        let candidate = self.filename.rsplit(['/', '\\']).next()?;
        match candidate {
            "" | "." | ".." => None,
            name => Some(name.to_string()),
        }
    }

    /// Write the file into `dir` under its safe name
    pub async fn save_into(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let name = self.safe_name().ok_or_else(|| {
            Error::InvalidState(format!("refusing to save unnamed file {:?}", self.filename))
        })?;
        let path = dir.as_ref().join(name);
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}
