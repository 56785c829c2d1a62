//! Presence tracking
//!
//! Maps identities to their live connections. An identity is online while
//! it owns at least one connection. Anonymous connections never appear here.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::debug;

use crate::types::{ConnectionId, UserId};

#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Identity -> its live connections
    online: DashMap<UserId, HashSet<ConnectionId>>,
    /// Connection -> owning identity, for unregister by connection
    owners: DashMap<ConnectionId, UserId>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `user_id` as online through `connection_id`
    ///
    /// Returns true if this is the identity's first live connection.
    pub fn register(&self, connection_id: ConnectionId, user_id: UserId) -> bool {
        self.owners.insert(connection_id, user_id);
        let mut connections = self.online.entry(user_id).or_default();
        let first = connections.is_empty();
        connections.insert(connection_id);
        debug!(
            "User {} registered connection {} ({} live)",
            user_id,
            connection_id,
            connections.len()
        );
        first
    }

    /// Forget a connection
    ///
    /// Returns the identity if it has just gone offline.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<UserId> {
        let (_, user_id) = self.owners.remove(&connection_id)?;
        let now_offline = self
            .online
            .remove_if_mut(&user_id, |_, connections| {
                connections.remove(&connection_id);
                connections.is_empty()
            })
            .is_some();
        debug!(
            "User {} unregistered connection {} (offline: {})",
            user_id, connection_id, now_offline
        );
        now_offline.then_some(user_id)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.online.get(&user_id).map_or(0, |c| c.len())
    }

    /// Number of identities currently online
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    pub fn clear(&self) {
        self.online.clear();
        self.owners.clear();
    }
}
