//! Error types for peer connection and file transfer

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or transferring files
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel identifier does not have the required shape
    #[error("Invalid channel identifier: {0}")]
    InvalidChannel(String),

    /// Operation requires a prior step (e.g. `create_offer` before `init`)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Data channel did not open within the deadline
    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    /// Relay unreachable or envelope malformed
    #[error("Signaling delivery error: {0}")]
    SignalingDelivery(String),

    /// ICE candidate rejected by the transport
    #[error("ICE candidate error: {0}")]
    IceApply(String),

    /// Remote peer declined a file; never retried
    #[error("Transfer rejected: {0}")]
    TransferRejected(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingDelivery(_)
                | Error::TransportTimeout(_)
                | Error::WebSocketError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::InvalidChannel(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Precondition("peer connection not initialized".to_string());
        assert_eq!(
            err.to_string(),
            "Precondition failed: peer connection not initialized"
        );
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingDelivery("test".to_string()).is_retryable());
        assert!(Error::TransportTimeout("test".to_string()).is_retryable());
        assert!(!Error::TransferRejected("test".to_string()).is_retryable());
        assert!(!Error::Precondition("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("test".to_string()).is_config_error());
        assert!(Error::InvalidChannel("test".to_string()).is_config_error());
        assert!(!Error::IceApply("test".to_string()).is_config_error());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
