//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based unique connection identifier
//! - `UserId`: numeric identity owned by the account system
//! - `RoomKey`: derived key for a two-party private conversation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4. One identity may own many connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user as seen by the chat
///
/// Owned by the identity provider; the chat only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub avatar: String,
}

/// Private room key: `chat_<low>_<high>`
///
/// Derived from an unordered pair of identities, so both participants
/// always land on the same key. User ids are integers, so the `_`
/// separator never appears inside one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    /// Compute the room key for a pair of identities (order-independent)
    pub fn between(a: UserId, b: UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("chat_{}_{}", low, high))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_room_key_format() {
        let key = RoomKey::between(UserId(12), UserId(7));
        assert_eq!(key.as_str(), "chat_7_12");
    }

    #[test]
    fn test_room_key_commutative() {
        for (a, b) in [(1, 2), (7, 12), (99, 3), (-4, 4), (5, 5)] {
            assert_eq!(
                RoomKey::between(UserId(a), UserId(b)),
                RoomKey::between(UserId(b), UserId(a))
            );
        }
    }

    #[test]
    fn test_room_key_distinct_pairs() {
        // Pairs that would collide under naive concatenation
        let pairs = [(1, 12), (11, 2), (1, 2), (12, 1), (112, 0), (7, 12), (7, 99)];
        let mut seen = std::collections::HashMap::new();
        for (a, b) in pairs {
            let unordered = (a.min(b), a.max(b));
            let key = RoomKey::between(UserId(a), UserId(b));
            if let Some(previous) = seen.insert(key.clone(), unordered) {
                assert_eq!(previous, unordered, "collision on {}", key);
            }
        }
        assert_eq!(seen.len(), 6);
    }
}
