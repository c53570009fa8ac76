//! # Services
//!
//! - **Relay**: accept loop and packet routing between peers
//! - **Registry**: the relay's live connections keyed by random id
//! - **Peer**: client façade over one relay connection

pub mod peer;
pub mod registry;
pub mod relay;

pub use peer::Peer;
pub use registry::{ConnectionId, RelayRegistry};
pub use relay::Relay;
