//! Error types for frame ingestion and bus transports

use thiserror::Error;

/// Reasons a raw frame record is rejected during ingestion
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    /// DLC is not defined for the frame flavour (e.g. 9..15 on classic CAN)
    #[error("Invalid DLC {dlc} for {} frame", flavour(*is_fd))]
    InvalidDlc { dlc: u8, is_fd: bool },

    /// Payload length disagrees with the declared DLC
    #[error("Payload length {actual} does not match DLC {dlc} (expected {expected} bytes)")]
    LengthMismatch {
        dlc: u8,
        expected: usize,
        actual: usize,
    },

    /// Payload length has no DLC encoding
    #[error("Payload length {len} is not valid for {} frame", flavour(*is_fd))]
    InvalidLength { len: usize, is_fd: bool },

    /// Timestamp is NaN or infinite
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),
}

fn flavour(is_fd: bool) -> &'static str {
    if is_fd {
        "CAN-FD"
    } else {
        "classic CAN"
    }
}

/// Errors raised by a bus transport
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_messages() {
        let err = FrameError::InvalidDlc { dlc: 12, is_fd: false };
        assert_eq!(err.to_string(), "Invalid DLC 12 for classic CAN frame");

        let err = FrameError::InvalidLength { len: 13, is_fd: true };
        assert_eq!(err.to_string(), "Payload length 13 is not valid for CAN-FD frame");
    }
}
