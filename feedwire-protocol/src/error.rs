//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or message handling.
///
/// Structural decode errors (`UnknownCommand`, `MalformedPayload`,
/// `InvalidLength`) are connection-fatal: payload layout is command-specific,
/// so there is no safe way to skip past a frame that cannot be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command: {0:#06x}")]
    UnknownCommand(u16),

    #[error("malformed payload for command {command:#06x}")]
    MalformedPayload { command: u16 },

    #[error("declared frame length {0} is shorter than the frame header")]
    InvalidLength(u32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownCommand(0x8004);
        assert!(err.to_string().contains("0x8004"));

        let err = ProtocolError::MalformedPayload { command: 0x0003 };
        assert!(err.to_string().contains("0x0003"));

        let err = ProtocolError::InvalidLength(3);
        assert!(err.to_string().contains('3'));

        let err = ProtocolError::FrameTooLarge {
            size: 100,
            max: 50,
        };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));
    }
}
