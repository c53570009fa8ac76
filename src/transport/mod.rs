//! # Transport Layer
//!
//! Framed byte-stream connections. Any `AsyncRead + AsyncWrite` stream works; the relay
//! and peers use TCP, tests use in-memory duplex pipes.

pub mod connection;

pub use connection::{CloseReason, Connection};
