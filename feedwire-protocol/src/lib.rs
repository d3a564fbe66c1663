//! # feedwire-protocol
//!
//! Wire protocol implementation for the feedwire event feed.
//!
//! This crate provides:
//! - Length-prefixed binary framing with multiplexed stream ids
//! - Typed command payloads (request/response and push messages)
//! - Filter expression AST and the declarative query compiler
//! - Protocol constants and error types

pub mod codec;
pub mod command;
pub mod error;
pub mod filter;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use command::{CommandType, PUSH_BIT};
pub use error::ProtocolError;
pub use filter::{compile, FieldPath, FilterError, FilterExpr};
pub use frame::{Frame, FRAME_HEADER_SIZE};
pub use message::Message;

/// Default port for the feed service.
pub const DEFAULT_PORT: u16 = 11222;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
