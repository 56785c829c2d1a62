//! Real-time chat for the reading tracker
//!
//! A WebSocket chat server built with tokio-tungstenite: one public channel
//! broadcast to everyone, plus two-party private rooms with persisted
//! history.
//!
//! # Features
//! - Session-token authentication at handshake or via an `authenticate` event
//! - Presence announcements on connect
//! - Public channel with recent backlog on login
//! - Private rooms keyed by the unordered pair of identities
//! - Conversation history on joining a room
//! - In-memory or SQLite message storage
//!
//! # Architecture
//! - `ChatHub` owns all shared state (presence, room subscriptions, the
//!   broadcast bus) and is shared as `Arc<ChatHub>`
//! - Each connection runs a `Session` state machine fed by an inbound
//!   channel; its events are handled strictly in order
//! - Shared maps are sharded (`DashMap`) so unrelated connections rarely
//!   contend
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use reading_chat::{handle_connection, ChatHub, Config, IdentityDirectory, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let hub = Arc::new(ChatHub::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(IdentityDirectory::new()),
//!         &config,
//!     ));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, Arc::clone(&hub)));
//!     }
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod identity;
pub mod message;
pub mod presence;
pub mod router;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use bus::{BroadcastBus, Target};
pub use config::Config;
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use hub::ChatHub;
pub use identity::{IdentityDirectory, IdentityProvider};
pub use message::{ClientEvent, ErrorCode, PrivateMessageView, PublicMessageView, ServerEvent};
pub use presence::PresenceTracker;
pub use router::RoomRouter;
pub use session::{Inbound, Session, SessionState};
pub use store::{MemoryStore, MessageStore, PrivateMessage, PublicMessage, SqliteStore};
pub use types::{ConnectionId, Identity, RoomKey, UserId};
