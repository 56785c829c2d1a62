//! Message persistence
//!
//! Append-only storage for public and private messages with ordered reads.
//! Two backends implement [`MessageStore`]:
//! - [`MemoryStore`]: in-process, used when no database is configured
//! - [`SqliteStore`]: durable, backed by an sqlx SQLite pool
//!
//! Reads return the most recent `limit` messages, oldest first. Messages
//! with equal timestamps are ordered by id.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::types::UserId;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Message posted to the public channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicMessage {
    pub id: i64,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Message between two identities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl PrivateMessage {
    /// Whether this message belongs to the conversation between `a` and `b`
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }
}

/// Durable message storage
///
/// Once an `append_*` call returns, every subsequent read from any caller
/// observes the appended message.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a public message. Blank content is rejected.
    async fn append_public(
        &self,
        author_id: UserId,
        content: &str,
    ) -> Result<PublicMessage, AppError>;

    /// Persist a private message. Blank content is rejected; the recipient
    /// is not checked here.
    async fn append_private(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
    ) -> Result<PrivateMessage, AppError>;

    /// Most recent `limit` public messages, oldest first
    async fn recent_public(&self, limit: usize) -> Result<Vec<PublicMessage>, AppError>;

    /// Most recent `limit` messages between `a` and `b` (either direction), oldest first
    async fn conversation_between(
        &self,
        a: UserId,
        b: UserId,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, AppError>;
}

/// Reject empty or whitespace-only content
pub(crate) fn validate_content(content: &str) -> Result<(), AppError> {
    if content.trim().is_empty() {
        return Err(AppError::EmptyContent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content() {
        assert!(validate_content("oi").is_ok());
        assert!(matches!(validate_content(""), Err(AppError::EmptyContent)));
        assert!(matches!(validate_content("  \n\t"), Err(AppError::EmptyContent)));
    }

    #[test]
    fn test_is_between_either_direction() {
        let message = PrivateMessage {
            id: 1,
            sender_id: UserId(12),
            recipient_id: UserId(7),
            content: "oi".to_string(),
            created_at: Utc::now(),
            read: false,
        };
        assert!(message.is_between(UserId(7), UserId(12)));
        assert!(message.is_between(UserId(12), UserId(7)));
        assert!(!message.is_between(UserId(7), UserId(99)));
    }
}
