//! # Error Types
//!
//! Error handling for the relay, its peers and the wire codec.
//!
//! ## Error Categories
//! - **Protocol errors** ([`ProtocolError`]): unknown packet type, truncated or malformed
//!   frames. Always fatal to the connection that produced them: a byte stream cannot be
//!   resynchronized past corrupted data.
//! - **Connection errors** ([`ConnectionError`]): refused connects, closed streams, write
//!   failures. Surfaced to the caller of the operation, never retried.
//! - **Handler failures** ([`HandlerFailure`]): a channel handler panicked during dispatch.
//!   Reported to an out-of-band hook, never propagated.
//!
//! Registry operations do not fail: looking up or removing an absent connection id is a
//! no-op.
//!
//! ## Example Usage
//! ```rust,no_run
//! use channel_relay::error::{ConnectionError, Result};
//! use channel_relay::service::peer::Peer;
//! use tracing::error;
//!
//! async fn publish(peer: &Peer) -> Result<()> {
//!     match peer.send_message("chat", "hello").await {
//!         Err(ConnectionError::NotConnected) => {
//!             error!("relay went away, caller decides whether to reconnect");
//!             Err(ConnectionError::NotConnected)
//!         }
//!         other => other,
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Peer is not connected";
    pub const ERR_READER_TAKEN: &str = "Read loop already started for this connection";

    /// Field names used in protocol errors
    pub const FIELD_CHANNEL: &str = "channel";
    pub const FIELD_BODY: &str = "body";
}

/// Conditions that make a byte stream undecodable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Truncated frame: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Field '{field}' too large: {len} bytes (maximum {max})")]
    OversizedField {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Primary error type for connection, relay and peer operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection to {addr} refused: {source}")]
    Refused {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{}", constants::ERR_CONNECTION_CLOSED)]
    Closed,

    #[error("{}", constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("{}", constants::ERR_READER_TAKEN)]
    ReaderTaken,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A channel handler panicked while a message was being dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Handler #{index} on channel '{channel}' failed: {reason}")]
pub struct HandlerFailure {
    pub channel: String,
    pub index: usize,
    pub reason: String,
}

/// Type alias for Results using ConnectionError
pub type Result<T> = std::result::Result<T, ConnectionError>;
