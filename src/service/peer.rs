//! # Peer
//!
//! Client-side handle to a relay: publish messages on named channels and run local
//! handlers for the channels this peer cares about.
//!
//! Incoming messages are dispatched on the connection's read task. A channel nobody
//! registered is dropped quietly, and a handler that panics is reported to the error hook
//! while the other handlers still run.
//!
//! ## Example
//! ```rust,no_run
//! use channel_relay::service::peer::Peer;
//!
//! # async fn run() -> channel_relay::error::Result<()> {
//! let peer = Peer::connect("127.0.0.1", 7700).await?;
//! peer.register_channel("chat", |body| println!("chat: {body}"));
//! peer.send_message("chat", "hello").await?;
//! peer.close();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use crate::config::{PeerConfig, TransportConfig};
use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ConnectionError, HandlerFailure, Result};
use crate::protocol::channel::ChannelRegistry;
use crate::transport::connection::Connection;

pub struct Peer {
    connection: Connection,
    channels: Arc<ChannelRegistry>,
}

impl Peer {
    /// Connect to the relay at `host:port` with default transport settings.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with(host, port, &TransportConfig::default()).await
    }

    /// Connect using configuration.
    pub async fn from_config(peer: &PeerConfig, transport: &TransportConfig) -> Result<Self> {
        Self::connect_with(&peer.host, peer.port, transport).await
    }

    #[instrument(skip(transport))]
    async fn connect_with(host: &str, port: u16, transport: &TransportConfig) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ConnectionError::Refused {
                addr: addr.clone(),
                source,
            })?;

        let codec = PacketCodec::new(transport.max_field_size);
        let connection = Connection::from_tcp(stream, codec, transport.nodelay)?;
        Ok(Self::attach(connection))
    }

    /// Wrap an already-open connection and start dispatching what arrives on it.
    pub fn attach(connection: Connection) -> Self {
        let channels = Arc::new(ChannelRegistry::new());
        let dispatching = Arc::clone(&channels);
        let peer_addr = connection.peer_addr();

        connection.spawn_read_loop(
            move |packet| {
                let Packet::Message { channel, body } = packet;
                dispatching.dispatch(&channel, &body);
                async {}
            },
            move || debug!(relay = ?peer_addr, "Disconnected from relay"),
        );

        info!(relay = ?connection.peer_addr(), "Connected to relay");
        Self {
            connection,
            channels,
        }
    }

    /// Append `handler` to channel `name`; handlers run in registration order.
    pub fn register_channel<F>(&self, name: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.channels.register(name, handler);
    }

    /// Route handler panics somewhere other than the log.
    pub fn on_handler_error<F>(&self, hook: F)
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        self.channels.set_error_hook(hook);
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Publish `body` on `channel` through the relay. This peer does not receive its own
    /// message back.
    pub async fn send_message(&self, channel: &str, body: &str) -> Result<()> {
        if self.connection.is_closed() {
            return Err(ConnectionError::NotConnected);
        }
        match self.connection.send(&Packet::message(channel, body)).await {
            Err(ConnectionError::Closed) => Err(ConnectionError::NotConnected),
            other => other,
        }
    }

    /// Close the connection to the relay. Idempotent.
    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Resolves once the connection is gone, whichever side closed it.
    pub async fn closed(&self) {
        self.connection.closed().await
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.connection.close();
    }
}
