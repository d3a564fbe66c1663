//! Encoder and decoder for event feed frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;
use bytes::BytesMut;

/// Encodes messages into wire frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a message addressed to `stream_id` into wire bytes.
    pub fn encode(stream_id: u16, message: &Message) -> Result<BytesMut, ProtocolError> {
        message.into_frame(stream_id).encode()
    }
}

/// Decodes wire bytes into frames and messages.
///
/// Bytes are accumulated in an internal buffer and consumed frame-by-frame;
/// partial frames stay buffered until the rest arrives.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next typed message from the buffer.
    ///
    /// Returns the stream id alongside the message.
    pub fn decode_message(&mut self) -> Result<Option<(u16, Message)>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let message = Message::from_frame(&frame)?;
                Ok(Some((frame.stream_id, message)))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandType;
    use bytes::Bytes;
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = Message::SelectFeed {
            feed_name: "analytics".into(),
        };
        let encoded = Encoder::encode(5, &msg).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);

        let (stream_id, decoded) = decoder.decode_message().unwrap().unwrap();
        assert_eq!(stream_id, 5);
        assert_eq!(decoded, msg);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_then_complete() {
        let msg = Message::StreamRemoveFilter { filter_id: 2 };
        let encoded = Encoder::encode(1, &msg).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded[..5]);
        assert!(decoder.decode_message().unwrap().is_none());

        decoder.extend(&encoded[5..]);
        let (_, decoded) = decoder.decode_message().unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_command_is_fatal() {
        let frame = Frame::new(1, 0x7000, Bytes::new());
        let mut decoder = Decoder::new();
        decoder.extend(&frame.encode().unwrap());
        let result = decoder.decode_message();
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownCommand(0x7000))
        ));
    }

    #[test]
    fn test_clear() {
        let mut decoder = Decoder::new();
        decoder.extend(b"partial");
        assert_eq!(decoder.buffered(), 7);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::SelectFeed {
                feed_name: "events".into(),
            },
            Message::Success,
            Message::Error {
                code: 7,
                message: "busy".into(),
            },
            Message::StreamAddFilter {
                filter_id: 0,
                filter: Bytes::from_static(b"[\"equals\",[\"field\",\"meta\",\"key\"],[\"value\",\"t\"]]"),
            },
            Message::StreamStart { partition: Some(0) },
            Message::PushMutSet {
                seq_no: 1,
                cas: 2,
                rev_no: 3,
                expiry: 0,
                lock_time: 0,
                partition: 4,
                datatype: 1,
                key: Bytes::from_static(b"k"),
                value: Bytes::from_static(b"v"),
                filters: vec![0, 1],
            },
            Message::OpenStream { stream_id: 9 },
        ]
    }

    proptest! {
        // Feeding a frame sequence in arbitrarily sized slices yields the same
        // messages as feeding it whole.
        #[test]
        fn prop_streaming_reassembly(split_points in proptest::collection::vec(any::<u16>(), 0..8)) {
            let messages = sample_messages();
            let mut wire = BytesMut::new();
            for (i, msg) in messages.iter().enumerate() {
                wire.extend_from_slice(&Encoder::encode(i as u16 + 1, msg).unwrap());
            }
            let wire = wire.freeze();

            let mut cuts: Vec<usize> = split_points
                .into_iter()
                .map(|p| p as usize % (wire.len() + 1))
                .collect();
            cuts.push(0);
            cuts.push(wire.len());
            cuts.sort_unstable();

            let mut decoder = Decoder::new();
            let mut decoded = Vec::new();
            for pair in cuts.windows(2) {
                decoder.extend(&wire[pair[0]..pair[1]]);
                while let Some((_, msg)) = decoder.decode_message().unwrap() {
                    decoded.push(msg);
                }
            }

            prop_assert_eq!(decoded, messages);
            prop_assert_eq!(decoder.buffered(), 0);
        }

        // Round-trip law: encode then decode yields the frame back with an
        // empty remainder.
        #[test]
        fn prop_frame_roundtrip(stream_id in any::<u16>(), payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let frame = Frame::new(stream_id, CommandType::StreamAddFilter.raw(), Bytes::from(payload));
            let mut buf = frame.encode().unwrap();
            let decoded = Frame::decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(decoded, frame);
            prop_assert!(buf.is_empty());
        }
    }
}
