//! Client error types.

use feedwire_protocol::{FilterError, ProtocolError};
use thiserror::Error;

/// Client errors.
///
/// `Remote` is scoped to the single request it answers; `Protocol` and
/// `UnexpectedReply` are connection-fatal; `ConnectionClosed` is handed to
/// every pending request when the connection tears down.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("remote error {code}: {message}")]
    Remote { code: u32, message: String },

    #[error("unexpected reply to {request} request: command {command:#06x}")]
    UnexpectedReply {
        request: &'static str,
        command: u16,
    },
}

impl ClientError {
    /// Returns whether retrying against a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}
