//! Binary frame format for the event feed protocol.
//!
//! Frame layout (8-byte header + payload, all integers big-endian):
//!
//! ```text
//! +--------------+-----------+----------+-----------------+
//! | total_length | stream_id | command  | payload         |
//! |   4 bytes    |  2 bytes  | 2 bytes  | variable        |
//! +--------------+-----------+----------+-----------------+
//! ```
//!
//! `total_length` counts the header, so `total_length == 8 + payload.len()`.
//! Stream id 0 addresses the connection-global control plane.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (4 + 2 + 2).
pub const FRAME_HEADER_SIZE: usize = 8;

/// A parsed wire frame.
///
/// The frame layer does not interpret `command`; typed decoding happens in
/// [`crate::message::Message`]. Frames are never split or merged: decoding
/// consumes exactly `total_length` bytes per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical stream id (0 = control/global).
    pub stream_id: u16,
    /// Raw command value.
    pub command: u16,
    /// Command-specific payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream_id: u16, command: u16, payload: Bytes) -> Self {
        Self {
            stream_id,
            command,
            payload,
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len() as u32;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u32(FRAME_HEADER_SIZE as u32 + payload_len);
        buf.put_u16(self.stream_id);
        buf.put_u16(self.command);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was consumed,
    /// `Ok(None)` if more data is needed, or `Err` on structural errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let total_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (total_len as usize) < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidLength(total_len));
        }

        let payload_len = total_len as usize - FRAME_HEADER_SIZE;
        if payload_len > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if buf.len() < total_len as usize {
            return Ok(None);
        }

        let stream_id = u16::from_be_bytes([buf[4], buf[5]]);
        let command = u16::from_be_bytes([buf[6], buf[7]]);

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Self {
            stream_id,
            command,
            payload,
        }))
    }
}
