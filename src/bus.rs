//! Broadcast bus
//!
//! Fans events out to connection outbound queues. Delivery is at-most-once:
//! a full or closed queue drops the event for that connection only. Each
//! queue is FIFO, so events published in sequence arrive in sequence.

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::SendError;
use crate::message::ServerEvent;
use crate::router::RoomRouter;
use crate::types::{ConnectionId, RoomKey};

/// Delivery scope of a published event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every attached connection, authenticated or not
    Everyone,
    /// Connections subscribed to a private room
    Room(RoomKey),
    /// A single connection
    Connection(ConnectionId),
}

#[derive(Debug, Default)]
pub struct BroadcastBus {
    outbound: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering to a connection
    pub fn attach(&self, connection_id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        self.outbound.insert(connection_id, sender);
    }

    /// Stop delivering to a connection; takes effect for every later publish
    pub fn detach(&self, connection_id: ConnectionId) -> bool {
        self.outbound.remove(&connection_id).is_some()
    }

    pub fn is_attached(&self, connection_id: ConnectionId) -> bool {
        self.outbound.contains_key(&connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.outbound.len()
    }

    /// Deliver `event` to every connection matching `target`
    ///
    /// Returns the number of connections the event was queued for.
    pub fn publish(&self, event: ServerEvent, target: &Target, router: &RoomRouter) -> usize {
        let recipients: Vec<ConnectionId> = match target {
            Target::Everyone => self.outbound.iter().map(|entry| *entry.key()).collect(),
            Target::Room(key) => router.members(key),
            Target::Connection(id) => vec![*id],
        };

        let delivered = recipients
            .into_iter()
            .filter(|id| self.deliver(*id, event.clone()).is_ok())
            .count();
        debug!("Published to {:?}: {} recipient(s)", target, delivered);
        delivered
    }

    fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<(), SendError> {
        // Clone the sender so no shard lock is held while sending
        let Some(sender) = self.outbound.get(&connection_id).map(|s| s.value().clone()) else {
            return Err(SendError::ChannelClosed);
        };
        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!("Outbound queue full for {}, event dropped", connection_id);
                SendError::ChannelFull
            }
            TrySendError::Closed(_) => {
                debug!("Outbound queue closed for {}", connection_id);
                SendError::ChannelClosed
            }
        })
    }

    pub fn clear(&self) {
        self.outbound.clear();
    }
}
