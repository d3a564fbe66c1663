//! Semantic feed events delivered to watches and durable-feed consumers.

use bytes::Bytes;
use feedwire_protocol::Message;

/// One decoded change event.
///
/// The same shape is used for durable-feed items (replies to `pop`) and for
/// pushed watch events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Mutation {
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
    Expiry {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        partition: u16,
        key: Bytes,
    },
    Deletion {
        seq_no: u64,
        cas: u64,
        rev_no: u64,
        partition: u16,
        key: Bytes,
    },
    Rollback {
        seq_no: u64,
    },
}

impl FeedEvent {
    /// Returns the document key, if this event carries one.
    pub fn key(&self) -> Option<&Bytes> {
        match self {
            FeedEvent::Mutation { key, .. }
            | FeedEvent::Expiry { key, .. }
            | FeedEvent::Deletion { key, .. } => Some(key),
            FeedEvent::Rollback { .. } => None,
        }
    }

    /// Returns the event's sequence number.
    pub fn seq_no(&self) -> u64 {
        match self {
            FeedEvent::Mutation { seq_no, .. }
            | FeedEvent::Expiry { seq_no, .. }
            | FeedEvent::Deletion { seq_no, .. }
            | FeedEvent::Rollback { seq_no } => *seq_no,
        }
    }

    /// Converts a durable-feed item reply into an event.
    pub(crate) fn from_feed_reply(message: Message) -> Option<Self> {
        match message {
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
            } => Some(FeedEvent::Mutation {
                seq_no,
                cas,
                rev_no,
                expiry,
                lock_time,
                partition,
                datatype,
                key,
                value,
            }),
            Message::FeedMutExpire {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
            } => Some(FeedEvent::Expiry {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
            }),
            Message::FeedMutDelete {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
            } => Some(FeedEvent::Deletion {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
            }),
            Message::FeedMutRollback { seq_no } => Some(FeedEvent::Rollback { seq_no }),
            _ => None,
        }
    }
}

/// A pushed event tagged with every filter id it matched.
///
/// A single physical mutation satisfying several filters arrives once on the
/// wire; the subscription registry fans it out locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub event: FeedEvent,
    pub filters: Vec<u16>,
}

impl PushEvent {
    pub(crate) fn from_message(message: Message) -> Option<Self> {
        match message {
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
            } => Some(PushEvent {
                event: FeedEvent::Mutation {
                    seq_no,
                    cas,
                    rev_no,
                    expiry,
                    lock_time,
                    partition,
                    datatype,
                    key,
                    value,
                },
                filters,
            }),
            Message::PushMutExpire {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
                filters,
            } => Some(PushEvent {
                event: FeedEvent::Expiry {
                    seq_no,
                    cas,
                    rev_no,
                    partition,
                    key,
                },
                filters,
            }),
            Message::PushMutDelete {
                seq_no,
                cas,
                rev_no,
                partition,
                key,
                filters,
            } => Some(PushEvent {
                event: FeedEvent::Deletion {
                    seq_no,
                    cas,
                    rev_no,
                    partition,
                    key,
                },
                filters,
            }),
            _ => None,
        }
    }
}
