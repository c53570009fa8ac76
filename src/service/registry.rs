//! # Relay Registry
//!
//! The relay's set of live connections, keyed by [`ConnectionId`].
//!
//! Every read, insert, removal and iteration goes through one mutex, which is never held
//! across an `.await`: routing copies out the recipients that are live at the moment of
//! the call, releases the lock, then writes. A recipient that closes in between simply
//! fails its write, which is logged and counted.
//!
//! Id assignment draws random candidates and checks them against the map inside the same
//! critical section that inserts the winner, so two concurrent accepts can never end up
//! with the same id.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tracing::{debug, info, trace, warn};

use crate::core::codec::{EncodedFrame, PacketCodec};
use crate::core::packet::Packet;
use crate::transport::connection::Connection;
use crate::utils::metrics::RelayMetrics;

/// Identifies one live connection within one relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Draw a random candidate id. Uniqueness is enforced by the registry, not here.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

struct ConnectionRecord {
    id: ConnectionId,
    connection: Connection,
}

pub struct RelayRegistry {
    records: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    codec: PacketCodec,
    metrics: Arc<RelayMetrics>,
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new(PacketCodec::default(), Arc::new(RelayMetrics::new()))
    }
}

impl RelayRegistry {
    pub fn new(codec: PacketCodec, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            codec,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Register `connection` under a fresh random id.
    pub fn insert(&self, connection: Connection) -> ConnectionId {
        self.insert_with(ConnectionId::random, connection)
    }

    /// Register `connection` under the first id drawn from `draw` that is not live.
    pub fn insert_with<D>(&self, mut draw: D, connection: Connection) -> ConnectionId
    where
        D: FnMut() -> ConnectionId,
    {
        let mut records = self.records();
        let id = loop {
            let candidate = draw();
            if !records.contains_key(&candidate) {
                break candidate;
            }
            trace!(connection_id = %candidate, "Id collision, drawing again");
        };
        records.insert(id, ConnectionRecord { id, connection });
        let live = records.len();
        drop(records);

        self.metrics.connection_accepted();
        debug!(connection_id = %id, live, "Connection registered");
        id
    }

    /// Forward `packet` to every live connection except `sender`.
    ///
    /// Returns the number of successful deliveries. Failures are logged and never
    /// reported to the sender.
    pub async fn route_packet(&self, sender: ConnectionId, packet: &Packet) -> usize {
        self.fan_out(Some(sender), packet).await
    }

    /// Forward `packet` to every live connection.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        self.fan_out(None, packet).await
    }

    /// Forward `packet` to `target` only. An id that is not live is a no-op.
    pub async fn unicast(&self, target: ConnectionId, packet: &Packet) -> bool {
        let Some(connection) = self.records().get(&target).map(|r| r.connection.clone()) else {
            debug!(connection_id = %target, "Unicast target not connected");
            return false;
        };

        match connection.send(packet).await {
            Ok(()) => {
                self.metrics.frame_delivered();
                true
            }
            Err(e) => {
                self.metrics.delivery_failed();
                warn!(connection_id = %target, error = %e, "Unicast delivery failed");
                false
            }
        }
    }

    /// Drop the record for `id` and close its connection. Idempotent.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        let removed = self.records().remove(&id);
        match removed {
            Some(record) => {
                record.connection.close();
                self.metrics.connection_closed();
                info!(connection_id = %record.id, "Connection removed");
                true
            }
            None => false,
        }
    }

    /// Number of live connections at the instant of the call.
    pub fn count(&self) -> usize {
        self.records().len()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.records().keys().copied().collect()
    }

    /// Remove every record and close each connection exactly once.
    pub fn close_all(&self) -> usize {
        let drained: Vec<ConnectionRecord> = self.records().drain().map(|(_, r)| r).collect();
        for record in &drained {
            record.connection.close();
            self.metrics.connection_closed();
        }
        if !drained.is_empty() {
            info!(closed = drained.len(), "Closed all connections");
        }
        drained.len()
    }

    async fn fan_out(&self, exclude: Option<ConnectionId>, packet: &Packet) -> usize {
        let frame: EncodedFrame = match self.codec.encode_frame(packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Packet cannot be re-encoded, not routed");
                return 0;
            }
        };

        let recipients: Vec<(ConnectionId, Connection)> = self
            .records()
            .values()
            .filter(|r| Some(r.id) != exclude)
            .map(|r| (r.id, r.connection.clone()))
            .collect();

        let deliveries = recipients.into_iter().map(|(id, connection)| {
            let frame = frame.clone();
            async move { (id, connection.send_frame(frame).await) }
        });

        let mut delivered = 0;
        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.frame_delivered();
                }
                Err(e) => {
                    self.metrics.delivery_failed();
                    warn!(connection_id = %id, error = %e, "Delivery failed");
                }
            }
        }
        trace!(?exclude, delivered, "Packet routed");
        delivered
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
