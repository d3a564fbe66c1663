//! # feedwire-client
//!
//! Client library for the feedwire event feed service.
//!
//! One TCP connection carries any number of logical streams; replies are
//! correlated to requests purely by per-stream FIFO order. On top of that
//! the crate provides:
//! - Lazy, single-flight connection management ([`FeedManager`])
//! - Declarative watches with server-side filters and local fan-out
//!   ([`Bucket`], [`Watch`])
//! - Durable feed consumption with leases ([`Feed`], [`FeedItem`])

pub mod channel;
pub mod connection;
pub mod error;
pub mod event;
pub mod feed;
pub mod manager;
pub mod watch;

#[cfg(test)]
mod testutil;

pub use channel::Channel;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use event::{FeedEvent, PushEvent};
pub use feed::{Feed, FeedItem};
pub use manager::FeedManager;
pub use watch::{Bucket, Watch};
