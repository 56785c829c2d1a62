//! In-process message store
//!
//! The public stream has one lock; each private conversation has its own,
//! keyed by room key, so appends to unrelated conversations never contend.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{validate_content, MessageStore, PrivateMessage, PublicMessage};
use crate::error::AppError;
use crate::types::{RoomKey, UserId};

type Conversation = Arc<Mutex<Vec<PrivateMessage>>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    public: Mutex<Vec<PublicMessage>>,
    conversations: DashMap<RoomKey, Conversation>,
    public_seq: AtomicI64,
    private_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conversation(&self, a: UserId, b: UserId) -> Conversation {
        // Clone the Arc out so the shard lock is released before awaiting
        self.conversations
            .entry(RoomKey::between(a, b))
            .or_default()
            .value()
            .clone()
    }
}

fn tail<T: Clone>(items: &[T], limit: usize) -> Vec<T> {
    items[items.len().saturating_sub(limit)..].to_vec()
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_public(
        &self,
        author_id: UserId,
        content: &str,
    ) -> Result<PublicMessage, AppError> {
        validate_content(content)?;

        let mut public = self.public.lock().await;
        // Keep timestamps non-decreasing within the stream
        let now = Utc::now();
        let created_at = public.last().map_or(now, |last| last.created_at.max(now));
        let message = PublicMessage {
            id: self.public_seq.fetch_add(1, Ordering::SeqCst) + 1,
            author_id,
            content: content.to_string(),
            created_at,
        };
        public.push(message.clone());
        Ok(message)
    }

    async fn append_private(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
    ) -> Result<PrivateMessage, AppError> {
        validate_content(content)?;

        let conversation = self.conversation(sender_id, recipient_id);
        let mut messages = conversation.lock().await;
        let now = Utc::now();
        let created_at = messages.last().map_or(now, |last| last.created_at.max(now));
        let message = PrivateMessage {
            id: self.private_seq.fetch_add(1, Ordering::SeqCst) + 1,
            sender_id,
            recipient_id,
            content: content.to_string(),
            created_at,
            read: false,
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn recent_public(&self, limit: usize) -> Result<Vec<PublicMessage>, AppError> {
        let public = self.public.lock().await;
        Ok(tail(&public, limit))
    }

    async fn conversation_between(
        &self,
        a: UserId,
        b: UserId,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, AppError> {
        let Some(conversation) = self
            .conversations
            .get(&RoomKey::between(a, b))
            .map(|entry| entry.value().clone())
        else {
            return Ok(Vec::new());
        };
        let messages = conversation.lock().await;
        Ok(tail(&messages, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_public_rejects_empty() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.append_public(UserId(1), "").await,
            Err(AppError::EmptyContent)
        ));
        assert!(store.recent_public(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_public_returns_latest_ascending() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.append_public(UserId(1), &format!("m{}", i)).await.unwrap();
        }

        let recent = store.recent_public(3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m7", "m8", "m9"]);
        assert!(recent.windows(2).all(|w| w[0].created_at <= w[1].created_at && w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_conversation_is_unordered_pair() {
        let store = MemoryStore::new();
        store.append_private(UserId(7), UserId(12), "oi").await.unwrap();
        store.append_private(UserId(12), UserId(7), "ola").await.unwrap();
        store.append_private(UserId(7), UserId(99), "other").await.unwrap();

        let forward = store.conversation_between(UserId(7), UserId(12), 50).await.unwrap();
        let backward = store.conversation_between(UserId(12), UserId(7), 50).await.unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].content, "oi");
        assert_eq!(forward[1].content, "ola");
        assert!(forward.iter().all(|m| !m.read));
    }

    #[tokio::test]
    async fn test_conversation_between_unknown_pair_is_empty() {
        let store = MemoryStore::new();
        let messages = store.conversation_between(UserId(1), UserId(2), 50).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_visible() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();
        for sender in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    let content = format!("{}-{}", sender, i);
                    store
                        .append_private(UserId(sender % 2), UserId(100), &content)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let zero = store.conversation_between(UserId(0), UserId(100), 1000).await.unwrap();
        let one = store.conversation_between(UserId(1), UserId(100), 1000).await.unwrap();
        assert_eq!(zero.len() + one.len(), 200);
        assert!(zero.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
