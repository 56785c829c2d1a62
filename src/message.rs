//! Message protocol definitions
//!
//! JSON-based bidirectional event protocol using Serde's internally tagged
//! enums. Every frame carries an `"event"` field naming the variant.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::{PrivateMessage, PublicMessage};
use crate::types::{Identity, UserId};

/// Display format for public messages
const PUBLIC_TIME_FORMAT: &str = "%H:%M";

/// Display format for private messages
const PRIVATE_TIME_FORMAT: &str = "%H:%M - %d/%m/%Y";

/// Client → Server event
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Authenticate a connection that did not present credentials at handshake
    Authenticate { token: String },
    /// Post to the public channel
    SendPublicMessage { content: String },
    /// Subscribe to the private room shared with another identity
    JoinPrivateRoom { other_identity: UserId },
    /// Unsubscribe from a private room
    LeavePrivateRoom { other_identity: UserId },
    /// Send a private message to another identity
    SendPrivateMessage {
        recipient_identity: UserId,
        content: String,
    },
}

/// Server → Client event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// An identity opened a connection
    UserConnected { identity: String, avatar: String },
    /// Recent public channel backlog, oldest first
    PublicHistory { messages: Vec<PublicMessageView> },
    /// New message on the public channel
    NewPublicMessage(PublicMessageView),
    /// Private conversation backlog, oldest first
    ConversationHistory { messages: Vec<PrivateMessageView> },
    /// New message in a private room
    NewPrivateMessage(PrivateMessageView),
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Public message as delivered to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicMessageView {
    pub id: i64,
    pub identity: String,
    pub identity_id: UserId,
    pub avatar: String,
    pub content: String,
    pub time: String,
}

impl PublicMessageView {
    pub fn new(message: &PublicMessage, author: &Identity) -> Self {
        Self {
            id: message.id,
            identity: author.display_name.clone(),
            identity_id: author.id,
            avatar: author.avatar.clone(),
            content: message.content.clone(),
            time: message.created_at.format(PUBLIC_TIME_FORMAT).to_string(),
        }
    }
}

/// Private message as delivered to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrivateMessageView {
    pub id: i64,
    pub sender: String,
    pub sender_id: UserId,
    pub recipient: String,
    pub recipient_id: UserId,
    pub sender_avatar: String,
    pub content: String,
    pub read: bool,
    pub time: String,
}

impl PrivateMessageView {
    pub fn new(message: &PrivateMessage, sender: &Identity, recipient: &Identity) -> Self {
        Self {
            id: message.id,
            sender: sender.display_name.clone(),
            sender_id: sender.id,
            recipient: recipient.display_name.clone(),
            recipient_id: recipient.id,
            sender_avatar: sender.avatar.clone(),
            content: message.content.clone(),
            read: message.read,
            time: message.created_at.format(PRIVATE_TIME_FORMAT).to_string(),
        }
    }
}

/// Error codes for ServerEvent::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Message content was empty
    EmptyContent,
    /// Operation requires an authenticated identity
    Unauthorized,
    /// Connection is already authenticated
    AlreadyAuthenticated,
    /// Referenced identity does not exist
    NotFound,
    /// Message store failed; retry later
    StoreUnavailable,
}

/// Convert AppError to ServerEvent for client notification
impl From<AppError> for ServerEvent {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::EmptyContent => ErrorCode::EmptyContent,
            AppError::Unauthorized | AppError::InvalidCredentials => ErrorCode::Unauthorized,
            AppError::AlreadyAuthenticated => ErrorCode::AlreadyAuthenticated,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            AppError::Validation(_) | AppError::Json(_) => ErrorCode::InvalidMessage,
            // Fatal errors are not typically converted (connection closes)
            _ => {
                return ServerEvent::Error {
                    code: ErrorCode::InvalidMessage,
                    message: "Internal error".to_string(),
                }
            }
        };
        ServerEvent::Error {
            code,
            message: err.to_string(),
        }
    }
}
