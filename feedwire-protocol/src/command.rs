//! Command numbering for the event feed protocol.
//!
//! Commands occupy three disjoint ranges:
//!
//! - Normal request/response commands from `0x0000` upwards
//! - Temporary commands from `0x4000` upwards
//! - Push (unsolicited) commands from `0x8000` upwards, i.e. high bit set
//! - Control commands allocated downwards from `0x7fff`
//!
//! A handful of numbers are reserved without a payload contract
//! (`streamRecover`, the push advance/snapshot/sync/end group); they are never
//! encoded and fail decoding as unknown commands.

use crate::error::ProtocolError;

/// High bit marking push (unsolicited) commands.
pub const PUSH_BIT: u16 = 0x8000;

/// Commands with a defined payload contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandType {
    // Normal messages (0x0000 upwards)
    SelectFeed = 0x0001,
    Success = 0x0002,
    Error = 0x0003,
    FeedMutSet = 0x0004,
    FeedMutExpire = 0x0005,
    FeedMutDelete = 0x0006,
    FeedMutRollback = 0x0007,
    FeedPop = 0x0008,
    FeedAck = 0x0009,
    FeedCancel = 0x000a,
    FeedRefresh = 0x000b,
    StreamAddFilter = 0x000c,
    StreamRemoveFilter = 0x000d,
    StreamStart = 0x000e,
    StreamStop = 0x0010,
    BucketSelect = 0x0011,

    // Temporary messages (0x4000 upwards)
    GetPartitionCount = 0x4000,
    PartitionCount = 0x4001,

    // Push messages (0x8000 and up, i.e. high bit set)
    PushMutSet = 0x8001,
    PushMutExpire = 0x8002,
    PushMutDelete = 0x8003,
    PushFilterAdded = 0x8008,
    PushFilterRemoved = 0x8009,

    // Control messages (0x7fff downwards)
    OpenStream = 0x7ffe,
    CloseStream = 0x7ffd,
}

/// Reserved command numbers without a payload contract.
pub mod reserved {
    pub const STREAM_RECOVER: u16 = 0x000f;
    pub const PUSH_STREAM_ADVANCE: u16 = 0x8004;
    pub const PUSH_STREAM_SNAPSHOT: u16 = 0x8005;
    pub const PUSH_STREAM_SYNC: u16 = 0x8006;
    pub const PUSH_STREAM_END: u16 = 0x8007;
}

impl CommandType {
    /// Returns the raw wire value.
    pub fn raw(self) -> u16 {
        self as u16
    }

    /// Returns whether this command is a push (unsolicited) message.
    pub fn is_push(self) -> bool {
        self.raw() & PUSH_BIT != 0
    }
}

impl TryFrom<u16> for CommandType {
    type Error = ProtocolError;

    fn try_from(raw: u16) -> Result<Self, ProtocolError> {
        let cmd = match raw {
            0x0001 => CommandType::SelectFeed,
            0x0002 => CommandType::Success,
            0x0003 => CommandType::Error,
            0x0004 => CommandType::FeedMutSet,
            0x0005 => CommandType::FeedMutExpire,
            0x0006 => CommandType::FeedMutDelete,
            0x0007 => CommandType::FeedMutRollback,
            0x0008 => CommandType::FeedPop,
            0x0009 => CommandType::FeedAck,
            0x000a => CommandType::FeedCancel,
            0x000b => CommandType::FeedRefresh,
            0x000c => CommandType::StreamAddFilter,
            0x000d => CommandType::StreamRemoveFilter,
            0x000e => CommandType::StreamStart,
            0x0010 => CommandType::StreamStop,
            0x0011 => CommandType::BucketSelect,
            0x4000 => CommandType::GetPartitionCount,
            0x4001 => CommandType::PartitionCount,
            0x8001 => CommandType::PushMutSet,
            0x8002 => CommandType::PushMutExpire,
            0x8003 => CommandType::PushMutDelete,
            0x8008 => CommandType::PushFilterAdded,
            0x8009 => CommandType::PushFilterRemoved,
            0x7ffe => CommandType::OpenStream,
            0x7ffd => CommandType::CloseStream,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(cmd)
    }
}
