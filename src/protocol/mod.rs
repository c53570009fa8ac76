//! # Protocol Layer
//!
//! Peer-side message handling above the wire codec.
//!
//! - **Channel**: named topics mapped to ordered handler lists, with per-handler failure
//!   isolation during dispatch.

pub mod channel;

pub use channel::{Channel, ChannelRegistry, ErrorHook, Handler};
