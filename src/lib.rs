//! # Channel Relay
//!
//! A minimal publish/subscribe relay over framed TCP.
//!
//! A [`Relay`] accepts peer connections and forwards every message a peer sends to all
//! other connected peers. A [`Peer`] publishes messages on named channels and runs local
//! handlers for the channels it registered; messages on other channels are dropped on the
//! receiving side.
//!
//! ## Layers
//! - [`core`]: packet model, wire format and tokio codec
//! - [`transport`]: one framed, ordered connection per remote end
//! - [`protocol`]: channel name to handler dispatch on the peer
//! - [`service`]: the relay, its connection registry and the peer façade
//! - [`utils`]: logging setup and relay metrics
//!
//! Delivery is best-effort: no acknowledgement, no persistence, no retry.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::Packet;
pub use crate::error::{ConnectionError, HandlerFailure, ProtocolError, Result};
pub use crate::service::peer::Peer;
pub use crate::service::registry::ConnectionId;
pub use crate::service::relay::Relay;
pub use crate::transport::connection::{CloseReason, Connection};
