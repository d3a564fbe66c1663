//! Typed command payloads.
//!
//! Every command with a payload contract has a [`Message`] variant. Payload
//! layouts are fixed-prefix-then-variable-tail: multi-byte integers are
//! big-endian and any trailing variable field (key, value, message, filter
//! list) consumes the rest of the payload after the fixed prefix.

use crate::command::CommandType;
use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Selects a durable feed by name on this stream.
    SelectFeed { feed_name: String },
    /// Generic success reply.
    Success,
    /// Explicit error reply.
    Error { code: u32, message: String },
    /// Durable-feed mutation item (reply to `FeedPop`).
    FeedMutSet {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        expiry: u32,
        lock_time: u32,
        partition: u16,
        datatype: u8,
        key: Bytes,
        value: Bytes,
    },
    /// Durable-feed expiry item.
    FeedMutExpire {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        partition: u16,
        key: Bytes,
    },
    /// Durable-feed deletion item.
    FeedMutDelete {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        partition: u16,
        key: Bytes,
    },
    /// Durable-feed rollback marker.
    FeedMutRollback { seq_no: u64 },
    /// Dequeues the next unacknowledged feed item.
    FeedPop { flags: u32 },
    /// Acknowledges the current feed item at a durability level.
    FeedAck { durability: i32 },
    /// Cancels the current feed item.
    FeedCancel,
    /// Extends the processing lease on the current feed item.
    FeedRefresh { period_ms: u32 },
    /// Registers (or replaces) a filter on this stream.
    ///
    /// `filter` is an opaque JSON-encoded expression; empty means match-all.
    StreamAddFilter { filter_id: u16, filter: Bytes },
    /// Unregisters a filter.
    StreamRemoveFilter { filter_id: u16 },
    /// Begins push delivery. `Some(partition)` is the legacy partition-scoped
    /// encoding; `None` is the channel-scoped variant with an empty payload.
    StreamStart { partition: Option<u16> },
    /// Ends push delivery; same two encodings as `StreamStart`.
    StreamStop { partition: Option<u16> },
    /// Selects a bucket by name on this stream.
    BucketSelect { bucket_name: String },
    /// Asks for the bucket's partition count.
    GetPartitionCount,
    /// Partition count reply.
    PartitionCount { count: u16 },
    /// Pushed mutation, tagged with every filter id it matched.
    PushMutSet {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        expiry: u32,
        lock_time: u32,
        partition: u16,
        datatype: u8,
        key: Bytes,
        value: Bytes,
        filters: Vec<u16>,
    },
    /// Pushed expiry.
    PushMutExpire {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        partition: u16,
        key: Bytes,
        filters: Vec<u16>,
    },
    /// Pushed deletion.
    PushMutDelete {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        partition: u16,
        key: Bytes,
        filters: Vec<u16>,
    },
    /// Push acknowledgement that a filter became active.
    PushFilterAdded { filter_id: u16 },
    /// Push acknowledgement that a filter was removed.
    PushFilterRemoved { filter_id: u16 },
    /// Opens a logical stream (control plane, stream id 0).
    OpenStream { stream_id: u16 },
    /// Closes a logical stream (control plane, stream id 0).
    CloseStream { stream_id: u16 },
}

fn malformed(command: u16) -> ProtocolError {
    ProtocolError::MalformedPayload { command }
}

fn utf8(payload: &Bytes) -> Result<String, ProtocolError> {
    std::str::from_utf8(payload)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Parses a trailing filter-id list; the remainder must be even-length.
fn filter_list(mut rest: Bytes, command: u16) -> Result<Vec<u16>, ProtocolError> {
    if rest.len() % 2 != 0 {
        return Err(malformed(command));
    }
    let mut filters = Vec::with_capacity(rest.len() / 2);
    while rest.has_remaining() {
        filters.push(rest.get_u16());
    }
    Ok(filters)
}

impl Message {
    /// Returns this message's command type.
    pub fn command(&self) -> CommandType {
        match self {
            Message::SelectFeed { .. } => CommandType::SelectFeed,
            Message::Success => CommandType::Success,
            Message::Error { .. } => CommandType::Error,
            Message::FeedMutSet { .. } => CommandType::FeedMutSet,
            Message::FeedMutExpire { .. } => CommandType::FeedMutExpire,
            Message::FeedMutDelete { .. } => CommandType::FeedMutDelete,
            Message::FeedMutRollback { .. } => CommandType::FeedMutRollback,
            Message::FeedPop { .. } => CommandType::FeedPop,
            Message::FeedAck { .. } => CommandType::FeedAck,
            Message::FeedCancel => CommandType::FeedCancel,
            Message::FeedRefresh { .. } => CommandType::FeedRefresh,
            Message::StreamAddFilter { .. } => CommandType::StreamAddFilter,
            Message::StreamRemoveFilter { .. } => CommandType::StreamRemoveFilter,
            Message::StreamStart { .. } => CommandType::StreamStart,
            Message::StreamStop { .. } => CommandType::StreamStop,
            Message::BucketSelect { .. } => CommandType::BucketSelect,
            Message::GetPartitionCount => CommandType::GetPartitionCount,
            Message::PartitionCount { .. } => CommandType::PartitionCount,
            Message::PushMutSet { .. } => CommandType::PushMutSet,
            Message::PushMutExpire { .. } => CommandType::PushMutExpire,
            Message::PushMutDelete { .. } => CommandType::PushMutDelete,
            Message::PushFilterAdded { .. } => CommandType::PushFilterAdded,
            Message::PushFilterRemoved { .. } => CommandType::PushFilterRemoved,
            Message::OpenStream { .. } => CommandType::OpenStream,
            Message::CloseStream { .. } => CommandType::CloseStream,
        }
    }

    /// Decodes a typed message from a raw command value and payload.
    ///
    /// Unknown command values and length-contract violations are
    /// connection-fatal (see [`ProtocolError`]).
    pub fn decode(command: u16, payload: Bytes) -> Result<Self, ProtocolError> {
        let cmd = CommandType::try_from(command)?;
        let msg = match cmd {
            CommandType::SelectFeed => Message::SelectFeed {
                feed_name: utf8(&payload)?,
            },
            CommandType::Success => {
                if !payload.is_empty() {
                    return Err(malformed(command));
                }
                Message::Success
            }
            CommandType::Error => {
                if payload.len() < 4 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let code = p.get_u32();
                Message::Error {
                    code,
                    message: utf8(&p)?,
                }
            }
            CommandType::FeedMutSet => {
                // seq(8) cas(8) rev(8) expiry(4) lock(4) key_len(4) partition(2) datatype(1)
                if payload.len() < 39 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let seq_no = p.get_u64();
                let cas = p.get_u64();
                let rev_no = p.get_u64();
                let expiry = p.get_u32();
                let lock_time = p.get_u32();
                let key_len = p.get_u32() as usize;
                let partition = p.get_u16();
                let datatype = p.get_u8();
                if p.len() < key_len {
                    return Err(malformed(command));
                }
                let key = p.split_to(key_len);
                Message::FeedMutSet {
                    seq_no,
                    cas,
                    rev_no,
                    expiry,
                    lock_time,
                    partition,
                    datatype,
                    key,
                    value: p,
                }
            }
            CommandType::FeedMutExpire | CommandType::FeedMutDelete => {
                // seq(8) cas(8) rev(8) partition(2), key = rest
                if payload.len() < 26 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let seq_no = p.get_u64();
                let cas = p.get_u64();
                let rev_no = p.get_u64();
                let partition = p.get_u16();
                if cmd == CommandType::FeedMutExpire {
                    Message::FeedMutExpire {
                        seq_no,
                        cas,
                        rev_no,
                        partition,
                        key: p,
                    }
                } else {
                    Message::FeedMutDelete {
                        seq_no,
                        cas,
                        rev_no,
                        partition,
                        key: p,
                    }
                }
            }
            CommandType::FeedMutRollback => {
                if payload.len() != 8 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                Message::FeedMutRollback {
                    seq_no: p.get_u64(),
                }
            }
            CommandType::FeedPop => {
                if payload.len() != 4 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                Message::FeedPop { flags: p.get_u32() }
            }
            CommandType::FeedAck => {
                if payload.len() != 4 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                Message::FeedAck {
                    durability: p.get_i32(),
                }
            }
            CommandType::FeedCancel => {
                if !payload.is_empty() {
                    return Err(malformed(command));
                }
                Message::FeedCancel
            }
            CommandType::FeedRefresh => {
                if payload.len() != 4 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                Message::FeedRefresh {
                    period_ms: p.get_u32(),
                }
            }
            CommandType::StreamAddFilter => {
                if payload.len() < 2 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let filter_id = p.get_u16();
                Message::StreamAddFilter {
                    filter_id,
                    filter: p,
                }
            }
            CommandType::StreamRemoveFilter => {
                if payload.len() != 2 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                Message::StreamRemoveFilter {
                    filter_id: p.get_u16(),
                }
            }
            CommandType::StreamStart | CommandType::StreamStop => {
                let partition = match payload.len() {
                    0 => None,
                    2 => {
                        let mut p = payload;
                        Some(p.get_u16())
                    }
                    _ => return Err(malformed(command)),
                };
                if cmd == CommandType::StreamStart {
                    Message::StreamStart { partition }
                } else {
                    Message::StreamStop { partition }
                }
            }
            CommandType::BucketSelect => Message::BucketSelect {
                bucket_name: utf8(&payload)?,
            },
            CommandType::GetPartitionCount => {
                if !payload.is_empty() {
                    return Err(malformed(command));
                }
                Message::GetPartitionCount
            }
            CommandType::PartitionCount => {
                if payload.len() != 2 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                Message::PartitionCount { count: p.get_u16() }
            }
            CommandType::PushMutSet => {
                // seq(8) cas(8) rev(8) expiry(4) lock(4) key_len(4) value_len(4)
                // partition(2) datatype(1), then key, value, filter ids
                if payload.len() < 43 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let seq_no = p.get_u64();
                let cas = p.get_u64();
                let rev_no = p.get_u64();
                let expiry = p.get_u32();
                let lock_time = p.get_u32();
                let key_len = p.get_u32() as usize;
                let value_len = p.get_u32() as usize;
                let partition = p.get_u16();
                let datatype = p.get_u8();
                if p.len() < key_len + value_len {
                    return Err(malformed(command));
                }
                let key = p.split_to(key_len);
                let value = p.split_to(value_len);
                Message::PushMutSet {
                    seq_no,
                    cas,
                    rev_no,
                    expiry,
                    lock_time,
                    partition,
                    datatype,
                    key,
                    value,
                    filters: filter_list(p, command)?,
                }
            }
            CommandType::PushMutExpire | CommandType::PushMutDelete => {
                // seq(8) cas(8) rev(8) key_len(4) partition(2), then key, filter ids
                if payload.len() < 30 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let seq_no = p.get_u64();
                let cas = p.get_u64();
                let rev_no = p.get_u64();
                let key_len = p.get_u32() as usize;
                let partition = p.get_u16();
                if p.len() < key_len {
                    return Err(malformed(command));
                }
                let key = p.split_to(key_len);
                let filters = filter_list(p, command)?;
                if cmd == CommandType::PushMutExpire {
                    Message::PushMutExpire {
                        seq_no,
                        cas,
                        rev_no,
                        partition,
                        key,
                        filters,
                    }
                } else {
                    Message::PushMutDelete {
                        seq_no,
                        cas,
                        rev_no,
                        partition,
                        key,
                        filters,
                    }
                }
            }
            CommandType::PushFilterAdded | CommandType::PushFilterRemoved => {
                if payload.len() != 2 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let filter_id = p.get_u16();
                if cmd == CommandType::PushFilterAdded {
                    Message::PushFilterAdded { filter_id }
                } else {
                    Message::PushFilterRemoved { filter_id }
                }
            }
            CommandType::OpenStream | CommandType::CloseStream => {
                if payload.len() != 2 {
                    return Err(malformed(command));
                }
                let mut p = payload;
                let stream_id = p.get_u16();
                if cmd == CommandType::OpenStream {
                    Message::OpenStream { stream_id }
                } else {
                    Message::CloseStream { stream_id }
                }
            }
        };
        Ok(msg)
    }

    /// Decodes the typed message carried by a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        Self::decode(frame.command, frame.payload.clone())
    }

    /// Serializes this message's payload.
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::SelectFeed { feed_name } => buf.put_slice(feed_name.as_bytes()),
            Message::Success | Message::FeedCancel | Message::GetPartitionCount => {}
            Message::Error { code, message } => {
                buf.put_u32(*code);
                buf.put_slice(message.as_bytes());
            }
            Message::FeedMutSet {
                seq_no,
                cas,
                rev_no,
                expiry,
                lock_time,
                partition,
                datatype,
                key,
                value,
            } => {
                buf.put_u64(*seq_no);
                buf.put_u64(*cas);
                buf.put_u64(*rev_no);
                buf.put_u32(*expiry);
                buf.put_u32(*lock_time);
                buf.put_u32(key.len() as u32);
                buf.put_u16(*partition);
                buf.put_u8(*datatype);
                buf.put_slice(key);
                buf.put_slice(value);
            }
            Message::FeedMutExpire {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
            }
            | Message::FeedMutDelete {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
            } => {
                buf.put_u64(*seq_no);
                buf.put_u64(*cas);
                buf.put_u64(*rev_no);
                buf.put_u16(*partition);
                buf.put_slice(key);
            }
            Message::FeedMutRollback { seq_no } => buf.put_u64(*seq_no),
            Message::FeedPop { flags } => buf.put_u32(*flags),
            Message::FeedAck { durability } => buf.put_i32(*durability),
            Message::FeedRefresh { period_ms } => buf.put_u32(*period_ms),
            Message::StreamAddFilter { filter_id, filter } => {
                buf.put_u16(*filter_id);
                buf.put_slice(filter);
            }
            Message::StreamRemoveFilter { filter_id } => buf.put_u16(*filter_id),
            Message::StreamStart { partition } | Message::StreamStop { partition } => {
                if let Some(partition) = partition {
                    buf.put_u16(*partition);
                }
            }
            Message::BucketSelect { bucket_name } => buf.put_slice(bucket_name.as_bytes()),
            Message::PartitionCount { count } => buf.put_u16(*count),
            Message::PushMutSet {
                seq_no,
                cas,
                rev_no,
                expiry,
                lock_time,
                partition,
                datatype,
                key,
                value,
                filters,
            } => {
                buf.put_u64(*seq_no);
                buf.put_u64(*cas);
                buf.put_u64(*rev_no);
                buf.put_u32(*expiry);
                buf.put_u32(*lock_time);
                buf.put_u32(key.len() as u32);
                buf.put_u32(value.len() as u32);
                buf.put_u16(*partition);
                buf.put_u8(*datatype);
                buf.put_slice(key);
                buf.put_slice(value);
                for filter_id in filters {
                    buf.put_u16(*filter_id);
                }
            }
            Message::PushMutExpire {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
                filters,
            }
            | Message::PushMutDelete {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
                filters,
            } => {
                buf.put_u64(*seq_no);
                buf.put_u64(*cas);
                buf.put_u64(*rev_no);
                buf.put_u32(key.len() as u32);
                buf.put_u16(*partition);
                buf.put_slice(key);
                for filter_id in filters {
                    buf.put_u16(*filter_id);
                }
            }
            Message::PushFilterAdded { filter_id } | Message::PushFilterRemoved { filter_id } => {
                buf.put_u16(*filter_id)
            }
            Message::OpenStream { stream_id } | Message::CloseStream { stream_id } => {
                buf.put_u16(*stream_id)
            }
        }
        buf.freeze()
    }

    /// Wraps this message in a frame addressed to `stream_id`.
    pub fn into_frame(&self, stream_id: u16) -> Frame {
        Frame::new(stream_id, self.command().raw(), self.encode_payload())
    }
}
