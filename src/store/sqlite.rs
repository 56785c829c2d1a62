//! SQLite message store
//!
//! Timestamps are stored as Unix milliseconds. Private messages carry their
//! room key so a conversation is a single indexed range scan.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{validate_content, MessageStore, PrivateMessage, PublicMessage};
use crate::error::AppError;
use crate::types::{RoomKey, UserId};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS public_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_public_messages_created_at
        ON public_messages (created_at)",
    "CREATE TABLE IF NOT EXISTS private_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_key TEXT NOT NULL,
        sender_id INTEGER NOT NULL,
        recipient_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        read INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_private_messages_room
        ON private_messages (room_key, created_at)",
];

type PublicRow = (i64, i64, String, i64);
type PrivateRow = (i64, i64, i64, String, i64, bool);

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::Config(format!("invalid DATABASE_URL '{}': {}", url, e)))?
            .create_if_missing(true);

        let pool = pool_options(url).connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("SQLite message store ready at {}", url);
        Ok(store)
    }

    /// Fresh private in-memory database
    pub async fn in_memory() -> Result<Self, AppError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Pool settings for `url`
///
/// An in-memory database lives exactly as long as its connection, so that
/// pool keeps a single connection open and never retires it.
fn pool_options(url: &str) -> SqlitePoolOptions {
    if url.contains(":memory:") || url.contains("mode=memory") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::StoreUnavailable(format!("corrupt timestamp {}", millis)))
}

fn public_from_row(
    (id, author_id, content, created_at): PublicRow,
) -> Result<PublicMessage, AppError> {
    Ok(PublicMessage {
        id,
        author_id: UserId(author_id),
        content,
        created_at: from_millis(created_at)?,
    })
}

fn private_from_row(
    (id, sender_id, recipient_id, content, created_at, read): PrivateRow,
) -> Result<PrivateMessage, AppError> {
    Ok(PrivateMessage {
        id,
        sender_id: UserId(sender_id),
        recipient_id: UserId(recipient_id),
        content,
        created_at: from_millis(created_at)?,
        read,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_public(
        &self,
        author_id: UserId,
        content: &str,
    ) -> Result<PublicMessage, AppError> {
        validate_content(content)?;

        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO public_messages (author_id, content, created_at) VALUES (?, ?, ?)",
        )
        .bind(author_id.0)
        .bind(content)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(PublicMessage {
            id: result.last_insert_rowid(),
            author_id,
            content: content.to_string(),
            created_at: from_millis(created_at.timestamp_millis())?,
        })
    }

    async fn append_private(
        &self,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
    ) -> Result<PrivateMessage, AppError> {
        validate_content(content)?;

        let created_at = Utc::now();
        let room_key = RoomKey::between(sender_id, recipient_id);
        let result = sqlx::query(
            "INSERT INTO private_messages (room_key, sender_id, recipient_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(room_key.as_str())
        .bind(sender_id.0)
        .bind(recipient_id.0)
        .bind(content)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(PrivateMessage {
            id: result.last_insert_rowid(),
            sender_id,
            recipient_id,
            content: content.to_string(),
            created_at: from_millis(created_at.timestamp_millis())?,
            read: false,
        })
    }

    async fn recent_public(&self, limit: usize) -> Result<Vec<PublicMessage>, AppError> {
        let rows: Vec<PublicRow> = sqlx::query_as(
            "SELECT id, author_id, content, created_at FROM public_messages
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().rev().map(public_from_row).collect()
    }

    async fn conversation_between(
        &self,
        a: UserId,
        b: UserId,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, AppError> {
        let rows: Vec<PrivateRow> = sqlx::query_as(
            "SELECT id, sender_id, recipient_id, content, created_at, read FROM private_messages
             WHERE room_key = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(RoomKey::between(a, b).as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().rev().map(private_from_row).collect()
    }
}
