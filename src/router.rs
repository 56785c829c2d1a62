//! Private room subscriptions
//!
//! Tracks which rooms each connection has joined, and the reverse index
//! used by the broadcast bus to resolve `Target::Room`.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::debug;

use crate::types::{ConnectionId, RoomKey, UserId};

#[derive(Debug, Default)]
pub struct RoomRouter {
    /// Connection -> joined rooms
    subscriptions: DashMap<ConnectionId, HashSet<RoomKey>>,
    /// Room -> subscribed connections
    members: DashMap<RoomKey, HashSet<ConnectionId>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Room key for a two-party conversation
    pub fn room_key(a: UserId, b: UserId) -> RoomKey {
        RoomKey::between(a, b)
    }

    /// Subscribe a connection to a room
    ///
    /// Returns false if it was already subscribed.
    pub fn join(&self, connection_id: ConnectionId, key: &RoomKey) -> bool {
        let added = self
            .subscriptions
            .entry(connection_id)
            .or_default()
            .insert(key.clone());
        if added {
            self.members
                .entry(key.clone())
                .or_default()
                .insert(connection_id);
            debug!("Connection {} joined {}", connection_id, key);
        }
        added
    }

    /// Unsubscribe a connection from a room
    ///
    /// Returns false if it was not subscribed.
    pub fn leave(&self, connection_id: ConnectionId, key: &RoomKey) -> bool {
        let removed = self
            .subscriptions
            .get_mut(&connection_id)
            .is_some_and(|mut rooms| rooms.remove(key));
        if removed {
            self.members.remove_if_mut(key, |_, connections| {
                connections.remove(&connection_id);
                connections.is_empty()
            });
            debug!("Connection {} left {}", connection_id, key);
        }
        removed
    }

    /// Drop every subscription of a connection
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        let Some((_, rooms)) = self.subscriptions.remove(&connection_id) else {
            return;
        };
        for key in &rooms {
            self.members.remove_if_mut(key, |_, connections| {
                connections.remove(&connection_id);
                connections.is_empty()
            });
        }
        debug!("Connection {} dropped {} room(s)", connection_id, rooms.len());
    }

    /// Connections currently subscribed to `key`
    pub fn members(&self, key: &RoomKey) -> Vec<ConnectionId> {
        self.members
            .get(key)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection has joined
    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<RoomKey> {
        self.subscriptions
            .get(&connection_id)
            .map(|rooms| rooms.value().clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.subscriptions.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let router = RoomRouter::new();
        let conn = ConnectionId::new();
        let key = RoomRouter::room_key(UserId(7), UserId(12));

        assert!(router.join(conn, &key));
        assert!(!router.join(conn, &key));
        assert_eq!(router.rooms_of(conn).len(), 1);
        assert_eq!(router.members(&key), vec![conn]);
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let router = RoomRouter::new();
        let conn = ConnectionId::new();
        let key = RoomRouter::room_key(UserId(7), UserId(12));

        assert!(!router.leave(conn, &key));

        router.join(conn, &key);
        assert!(router.leave(conn, &key));
        assert!(router.members(&key).is_empty());
        assert!(router.rooms_of(conn).is_empty());
    }

    #[test]
    fn test_members_isolated_per_room() {
        let router = RoomRouter::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();
        let room = RoomRouter::room_key(UserId(7), UserId(12));
        let other = RoomRouter::room_key(UserId(7), UserId(99));

        router.join(a, &room);
        router.join(b, &room);
        router.join(c, &other);

        let members = router.members(&room);
        assert_eq!(members.len(), 2);
        assert!(!members.contains(&c));
    }

    #[test]
    fn test_remove_connection_drops_all_rooms() {
        let router = RoomRouter::new();
        let conn = ConnectionId::new();
        let keep = ConnectionId::new();
        let room = RoomRouter::room_key(UserId(1), UserId(2));
        let other = RoomRouter::room_key(UserId(1), UserId(3));

        router.join(conn, &room);
        router.join(conn, &other);
        router.join(keep, &room);
        router.remove_connection(conn);

        assert!(router.rooms_of(conn).is_empty());
        assert_eq!(router.members(&room), vec![keep]);
        assert!(router.members(&other).is_empty());
    }
}
