//! # Core Protocol Components
//!
//! Packet model, frame layout and the tokio codec.
//!
//! ## Components
//! - **Packet**: tagged enum of packet kinds, immutable once built
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! All integers big-endian.
//! ```text
//! [Tag(1)] [ChannelLen(4)] [Channel(N)] [BodyLen(4)] [Body(M)]
//! ```
//! Tag `0` is `Message`; channel and body are UTF-8.
//!
//! ## Safety Limits
//! - Maximum field size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation
//! - Unknown tags fail instead of skipping bytes, which would desynchronize the stream

pub mod codec;
pub mod packet;
