//! # Relay
//!
//! Accepts peer connections and forwards every packet a peer sends to all other peers.
//!
//! Each accepted stream becomes a [`Connection`] registered in the [`RelayRegistry`]
//! before its read loop starts, so it is routable from its first frame. The read loop
//! routes with the connection's own id as the excluded sender and removes the record
//! when the stream ends.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ServerConfig, TransportConfig};
use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ConnectionError, Result};
use crate::service::registry::{ConnectionId, RelayRegistry};
use crate::transport::connection::{CloseReason, Connection};
use crate::utils::metrics::RelayMetrics;

/// Settings the accept loop needs for every admitted stream.
#[derive(Debug, Clone, Copy)]
struct Admission {
    codec: PacketCodec,
    nodelay: bool,
    backoff: Duration,
}

impl Default for Admission {
    fn default() -> Self {
        let server = ServerConfig::default();
        let transport = TransportConfig::default();
        Self {
            codec: PacketCodec::new(transport.max_field_size),
            nodelay: transport.nodelay,
            backoff: server.accept_backoff,
        }
    }
}

/// Handle to a running relay.
pub struct Relay {
    local_addr: SocketAddr,
    registry: Arc<RelayRegistry>,
    shutdown: CancellationToken,
    /// Cancelled once `shutdown()` has closed every connection
    shutdown_complete: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    /// Listen on every interface at `port`. Port 0 picks a free port.
    pub async fn start(port: u16) -> Result<Self> {
        Self::bind(&format!("0.0.0.0:{port}")).await
    }

    /// Listen on `addr` with default transport settings.
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::listen(addr, Admission::default()).await
    }

    /// Listen according to configuration.
    pub async fn from_config(server: &ServerConfig, transport: &TransportConfig) -> Result<Self> {
        let admission = Admission {
            codec: PacketCodec::new(transport.max_field_size),
            nodelay: transport.nodelay,
            backoff: server.accept_backoff,
        };
        Self::listen(&server.address, admission).await
    }

    #[instrument(skip(admission))]
    async fn listen(addr: &str, admission: Admission) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ConnectionError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(RelayRegistry::new(admission.codec, metrics));
        let shutdown = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&registry),
            shutdown.clone(),
            admission,
        ));

        info!(address = %local_addr, "Relay listening");
        Ok(Self {
            local_addr,
            registry,
            shutdown,
            shutdown_complete: CancellationToken::new(),
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Live connections right now; advisory under concurrency.
    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        self.registry.metrics()
    }

    /// Send a relay-originated packet to a single peer; absent ids are ignored.
    pub async fn unicast(&self, target: ConnectionId, packet: &Packet) -> bool {
        self.registry.unicast(target, packet).await
    }

    /// Send a relay-originated packet to every peer.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        self.registry.broadcast(packet).await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting, close every live connection once, and clear the registry.
    ///
    /// Every caller returns only after the registry is empty, including callers that
    /// arrive while another shutdown is still in progress.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = accept_task else {
            self.shutdown_complete.cancelled().await;
            return;
        };

        // Runs to completion even if this caller stops waiting
        let registry = Arc::clone(&self.registry);
        let complete = self.shutdown_complete.clone();
        let address = self.local_addr;
        let finishing = tokio::spawn(async move {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept task ended abnormally");
            }
            let closed = registry.close_all();
            complete.cancel();
            info!(%address, closed, "Relay shut down");
        });

        if let Err(e) = finishing.await {
            warn!(error = %e, "Shutdown task ended abnormally");
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<RelayRegistry>,
    shutdown: CancellationToken,
    admission: Admission,
) {
    let mut incoming = TcpListenerStream::new(listener);

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = incoming.next() => next,
        };

        match next {
            Some(Ok(stream)) => {
                if let Err(e) = admit(&registry, stream, admission) {
                    warn!(error = %e, "Dropping connection that failed setup");
                }
            }
            Some(Err(e)) if is_transient(&e) => {
                warn!(error = %e, "Transient accept error");
                tokio::time::sleep(admission.backoff).await;
            }
            Some(Err(e)) => {
                error!(error = %e, "Listener failed, no longer accepting");
                break;
            }
            None => break,
        }
    }
    debug!("Accept loop stopped");
}

/// Register the stream and start its read loop.
fn admit(registry: &Arc<RelayRegistry>, stream: TcpStream, admission: Admission) -> Result<ConnectionId> {
    let connection = Connection::from_tcp(stream, admission.codec, admission.nodelay)?;
    let peer = connection.peer_addr();
    let id = registry.insert(connection.clone());
    info!(connection_id = %id, peer = ?peer, "Peer connected");

    let routing = Arc::clone(registry);
    let closing = Arc::clone(registry);
    let metrics = Arc::clone(registry.metrics());

    tokio::spawn(async move {
        let outcome = connection
            .read_loop(
                move |packet| {
                    let routing = Arc::clone(&routing);
                    async move {
                        routing.metrics().packet_received();
                        routing.route_packet(id, &packet).await;
                    }
                },
                move || {
                    closing.remove_connection(id);
                },
            )
            .await;

        match outcome {
            Ok(CloseReason::Error(ConnectionError::Protocol(e))) => {
                metrics.protocol_error();
                warn!(connection_id = %id, error = %e, "Peer sent malformed data");
            }
            Ok(reason) => debug!(connection_id = %id, ?reason, "Peer read loop finished"),
            Err(e) => warn!(connection_id = %id, error = %e, "Read loop not started"),
        }
    });

    Ok(id)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::other("listener gone")));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = Relay::bind("127.0.0.1:0").await.expect("bind");
        let taken = first.local_addr().to_string();
        let second = Relay::bind(&taken).await;
        assert!(matches!(second, Err(ConnectionError::Bind { .. })));
        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_shutdowns_all_wait_for_close() {
        let relay = Relay::bind("127.0.0.1:0").await.expect("bind");
        let _client = TcpStream::connect(relay.local_addr()).await.expect("connect");
        while relay.connection_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (first, second) = tokio::join!(
            async {
                relay.shutdown().await;
                relay.connection_count()
            },
            async {
                relay.shutdown().await;
                relay.connection_count()
            }
        );
        assert_eq!(first, 0);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let relay = Relay::bind("127.0.0.1:0").await.expect("bind");
        relay.shutdown().await;
        relay.shutdown().await;
        assert!(relay.is_shut_down());
        assert_eq!(relay.connection_count(), 0);
    }
}
