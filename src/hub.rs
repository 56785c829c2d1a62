//! Chat hub
//!
//! Owns all shared state of the chat: presence, room subscriptions, the
//! broadcast bus, and handles to the message store and identity provider.
//! Each connection holds an `Arc<ChatHub>` and drives it through a
//! [`Session`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::bus::{BroadcastBus, Target};
use crate::config::{Config, MAX_HISTORY_LIMIT};
use crate::identity::{IdentityProvider, DEFAULT_AVATAR};
use crate::message::ServerEvent;
use crate::presence::PresenceTracker;
use crate::router::RoomRouter;
use crate::session::Session;
use crate::store::MessageStore;
use crate::types::{ConnectionId, Identity, UserId};

pub struct ChatHub {
    store: Arc<dyn MessageStore>,
    identities: Arc<dyn IdentityProvider>,
    presence: PresenceTracker,
    router: RoomRouter,
    bus: BroadcastBus,
    history_limit: usize,
    outbound_buffer: usize,
    explicit_auth_errors: bool,
}

impl ChatHub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        identities: Arc<dyn IdentityProvider>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            identities,
            presence: PresenceTracker::new(),
            router: RoomRouter::new(),
            bus: BroadcastBus::new(),
            history_limit: config.history_limit.clamp(1, MAX_HISTORY_LIMIT),
            outbound_buffer: config.outbound_buffer,
            explicit_auth_errors: config.explicit_auth_errors,
        }
    }

    /// Attach a new connection to the bus and return its session
    ///
    /// The session starts anonymous.
    pub fn open_session(self: &Arc<Self>, sender: mpsc::Sender<ServerEvent>) -> Session {
        let id = ConnectionId::new();
        self.bus.attach(id, sender);
        info!(
            "Connection {} opened ({} attached)",
            id,
            self.bus.connection_count()
        );
        Session::new(id, Arc::clone(self))
    }

    /// Deliver an event to every connection matching `target`
    pub fn publish(&self, event: ServerEvent, target: &Target) -> usize {
        self.bus.publish(event, target, &self.router)
    }

    /// Tear down a connection: stop delivery, drop subscriptions, update presence
    pub(crate) fn close_connection(&self, id: ConnectionId) {
        self.bus.detach(id);
        self.router.remove_connection(id);
        if let Some(user_id) = self.presence.unregister(id) {
            info!("User {} is now offline", user_id);
        }
    }

    /// Resolve a session token
    pub fn authenticate(&self, token: &str) -> Option<Identity> {
        self.identities.authenticate(token)
    }

    pub fn lookup(&self, id: UserId) -> Option<Identity> {
        self.identities.lookup(id)
    }

    /// Profile for display, falling back to a placeholder for deleted accounts
    pub(crate) fn profile_or_unknown(&self, id: UserId) -> Identity {
        self.lookup(id).unwrap_or_else(|| Identity {
            id,
            display_name: "Unknown".to_string(),
            avatar: DEFAULT_AVATAR.to_string(),
        })
    }

    pub fn store(&self) -> &dyn MessageStore {
        self.store.as_ref()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Capacity of each connection's outbound queue
    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }

    pub fn explicit_auth_errors(&self) -> bool {
        self.explicit_auth_errors
    }

    /// Remove every connection, subscription and presence entry
    pub fn shutdown(&self) {
        info!(
            "Chat hub shutting down ({} connections, {} users online)",
            self.bus.connection_count(),
            self.presence.online_count()
        );
        self.bus.clear();
        self.router.clear();
        self.presence.clear();
    }
}
