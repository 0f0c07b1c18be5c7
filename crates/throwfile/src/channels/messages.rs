//! Data channel frame types
//!
//! The data channel multiplexes two kinds of traffic:
//! - text frames carrying JSON control messages for the per-file handshake
//! - binary frames carrying raw file chunks

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One frame as delivered by the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelFrame {
    /// UTF-8 text frame (JSON control message)
    Text(String),
    /// Raw binary frame (file chunk)
    Binary(Bytes),
}

impl DataChannelFrame {
    /// Size of the frame payload in bytes
    pub fn size(&self) -> usize {
        match self {
            DataChannelFrame::Text(t) => t.len(),
            DataChannelFrame::Binary(b) => b.len(),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, DataChannelFrame::Binary(_))
    }
}

/// JSON control frames of the per-file request/accept/reject handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// Sender asks for consent to send a file
    FileInfoRequest {
        filename: String,
        size: u64,
    },
    /// Receiver agreed to take the file
    FileInfoAccept {
        filename: String,
    },
    /// Receiver declined the file
    FileInfoReject {
        filename: String,
    },
    /// Sender finished transmitting all chunks of the file
    FileComplete {
        filename: String,
    },
}

impl ControlFrame {
    /// Filename the frame refers to
    pub fn filename(&self) -> &str {
        match self {
            ControlFrame::FileInfoRequest { filename, .. }
            | ControlFrame::FileInfoAccept { filename }
            | ControlFrame::FileInfoReject { filename }
            | ControlFrame::FileComplete { filename } => filename,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let frame = ControlFrame::FileInfoRequest {
            filename: "photo.jpg".to_string(),
            size: 130_000,
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "file-info-request", "filename": "photo.jpg", "size": 130000})
        );
    }

    #[test]
    fn test_parse_browser_frames() {
        let accept = ControlFrame::from_json(r#"{"type":"file-info-accept","filename":"a.txt"}"#)
            .unwrap();
        assert_eq!(
            accept,
            ControlFrame::FileInfoAccept {
                filename: "a.txt".to_string()
            }
        );

        let complete =
            ControlFrame::from_json(r#"{"type":"file-complete","filename":"a.txt"}"#).unwrap();
        assert_eq!(complete.filename(), "a.txt");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ControlFrame::from_json(r#"{"type":"file-cancel","filename":"a"}"#).is_err());
        assert!(ControlFrame::from_json("not json").is_err());
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(DataChannelFrame::Text("abc".to_string()).size(), 3);
        let bin = DataChannelFrame::Binary(Bytes::from_static(&[0u8; 10]));
        assert_eq!(bin.size(), 10);
        assert!(bin.is_binary());
    }
}
