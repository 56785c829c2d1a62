//! Per-connection state machine
//!
//! A session moves `Anonymous` → `Authenticated` → `Disconnected`. Room
//! subscriptions are tracked by the router, independently of this state.
//! All events of one connection go through one session sequentially.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::bus::Target;
use crate::error::AppError;
use crate::hub::ChatHub;
use crate::message::{ClientEvent, PrivateMessageView, PublicMessageView, ServerEvent};
use crate::router::RoomRouter;
use crate::types::{ConnectionId, Identity, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected without a verified identity
    Anonymous,
    /// Connected as this identity
    Authenticated(Identity),
    /// Terminal
    Disconnected,
}

/// Decoded inbound frame
#[derive(Debug)]
pub enum Inbound {
    Event(ClientEvent),
    /// Frame that did not decode; the reason is reported back
    Malformed(String),
}

pub struct Session {
    id: ConnectionId,
    state: SessionState,
    hub: Arc<ChatHub>,
}

impl Session {
    pub(crate) fn new(id: ConnectionId, hub: Arc<ChatHub>) -> Self {
        Self {
            id,
            state: SessionState::Anonymous,
            hub,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    /// Enter the authenticated state as `identity`
    ///
    /// Registers presence, announces the connection to everyone (this
    /// connection included) and sends the public backlog to this connection.
    pub async fn authenticate_with(&mut self, identity: Identity) -> Result<(), AppError> {
        match self.state {
            SessionState::Anonymous => {}
            SessionState::Authenticated(_) => return Err(AppError::AlreadyAuthenticated),
            SessionState::Disconnected => return Ok(()),
        }

        self.hub.presence().register(self.id, identity.id);
        info!(
            "Connection {} authenticated as {} ({})",
            self.id, identity.display_name, identity.id
        );

        self.hub.publish(
            ServerEvent::UserConnected {
                identity: identity.display_name.clone(),
                avatar: identity.avatar.clone(),
            },
            &Target::Everyone,
        );
        self.state = SessionState::Authenticated(identity);

        self.send_public_history().await
    }

    /// Process one inbound event; failures are reported to this connection only
    pub async fn handle(&mut self, event: ClientEvent) {
        if self.state == SessionState::Disconnected {
            debug!("Ignoring event on closed connection {}", self.id);
            return;
        }

        if let Err(err) = self.dispatch(event).await {
            self.report(err);
        }
    }

    /// Send an error event to this connection
    ///
    /// Unauthenticated messaging attempts are dropped silently unless the
    /// hub is configured to answer them.
    pub fn report(&self, err: AppError) {
        match &err {
            AppError::Unauthorized if !self.hub.explicit_auth_errors() => {
                debug!("Dropping unauthenticated event from {}", self.id);
                return;
            }
            AppError::StoreUnavailable(reason) => {
                error!("Store failure for connection {}: {}", self.id, reason);
            }
            _ => {
                warn!("Rejected event from {}: {}", self.id, err);
            }
        }
        self.hub.publish(err.into(), &Target::Connection(self.id));
    }

    /// Handle inbound frames in order until `closed` fires or the queue ends,
    /// then disconnect
    ///
    /// The close signal wins over queued frames, which are discarded. A frame
    /// already being handled runs to completion, so an accepted message is
    /// always persisted.
    pub async fn run(&mut self, inbound: &mut mpsc::Receiver<Inbound>, closed: &Notify) {
        loop {
            tokio::select! {
                biased;
                _ = closed.notified() => break,
                frame = inbound.recv() => match frame {
                    Some(Inbound::Event(event)) => self.handle(event).await,
                    Some(Inbound::Malformed(reason)) => self.report(AppError::Validation(reason)),
                    None => break,
                },
            }
        }
        self.disconnect();
    }

    /// Enter the terminal state and release everything held for this connection
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.hub.close_connection(self.id);
        self.state = SessionState::Disconnected;
        info!("Connection {} closed", self.id);
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<(), AppError> {
        match event {
            ClientEvent::Authenticate { token } => self.authenticate(&token).await,
            ClientEvent::SendPublicMessage { content } => {
                self.send_public_message(&content).await
            }
            ClientEvent::JoinPrivateRoom { other_identity } => {
                self.join_private_room(other_identity).await
            }
            ClientEvent::LeavePrivateRoom { other_identity } => {
                self.leave_private_room(other_identity)
            }
            ClientEvent::SendPrivateMessage {
                recipient_identity,
                content,
            } => self.send_private_message(recipient_identity, &content).await,
        }
    }

    fn require_identity(&self) -> Result<Identity, AppError> {
        self.identity().cloned().ok_or(AppError::Unauthorized)
    }

    fn require_profile(&self, id: UserId) -> Result<Identity, AppError> {
        self.hub
            .lookup(id)
            .ok_or_else(|| AppError::NotFound(format!("identity {}", id)))
    }

    async fn authenticate(&mut self, token: &str) -> Result<(), AppError> {
        if self.identity().is_some() {
            return Err(AppError::AlreadyAuthenticated);
        }
        let identity = self
            .hub
            .authenticate(token)
            .ok_or(AppError::InvalidCredentials)?;
        self.authenticate_with(identity).await
    }

    async fn send_public_history(&self) -> Result<(), AppError> {
        let recent = self
            .hub
            .store()
            .recent_public(self.hub.history_limit())
            .await?;

        let mut authors: HashMap<UserId, Identity> = HashMap::new();
        let messages = recent
            .iter()
            .map(|message| {
                let author = authors
                    .entry(message.author_id)
                    .or_insert_with(|| self.hub.profile_or_unknown(message.author_id));
                PublicMessageView::new(message, author)
            })
            .collect();

        self.hub.publish(
            ServerEvent::PublicHistory { messages },
            &Target::Connection(self.id),
        );
        Ok(())
    }

    async fn send_public_message(&self, content: &str) -> Result<(), AppError> {
        let author = self.require_identity()?;
        let message = self.hub.store().append_public(author.id, content).await?;
        debug!("Public message {} from {}", message.id, author.id);

        self.hub.publish(
            ServerEvent::NewPublicMessage(PublicMessageView::new(&message, &author)),
            &Target::Everyone,
        );
        Ok(())
    }

    async fn join_private_room(&self, other_id: UserId) -> Result<(), AppError> {
        let me = self.require_identity()?;
        let other = self.require_profile(other_id)?;

        let key = RoomRouter::room_key(me.id, other.id);
        let joined = self.hub.router().join(self.id, &key);

        let history = match self
            .hub
            .store()
            .conversation_between(me.id, other.id, self.hub.history_limit())
            .await
        {
            Ok(history) => history,
            Err(err) => {
                // A failed join leaves no subscription behind
                if joined {
                    self.hub.router().leave(self.id, &key);
                }
                return Err(err);
            }
        };
        let messages = history
            .iter()
            .map(|message| {
                if message.sender_id == me.id {
                    PrivateMessageView::new(message, &me, &other)
                } else {
                    PrivateMessageView::new(message, &other, &me)
                }
            })
            .collect();

        self.hub.publish(
            ServerEvent::ConversationHistory { messages },
            &Target::Connection(self.id),
        );
        Ok(())
    }

    fn leave_private_room(&self, other_id: UserId) -> Result<(), AppError> {
        let me = self.require_identity()?;
        self.hub
            .router()
            .leave(self.id, &RoomRouter::room_key(me.id, other_id));
        Ok(())
    }

    async fn send_private_message(
        &self,
        recipient_id: UserId,
        content: &str,
    ) -> Result<(), AppError> {
        let sender = self.require_identity()?;
        let recipient = self.require_profile(recipient_id)?;

        let message = self
            .hub
            .store()
            .append_private(sender.id, recipient.id, content)
            .await?;
        debug!(
            "Private message {} from {} to {}",
            message.id, sender.id, recipient.id
        );

        let view = PrivateMessageView::new(&message, &sender, &recipient);
        self.hub.publish(
            ServerEvent::NewPrivateMessage(view),
            &Target::Room(RoomRouter::room_key(sender.id, recipient.id)),
        );
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::identity::IdentityDirectory;
    use crate::message::ErrorCode;
    use crate::store::MemoryStore;

    fn identity(id: i64, name: &str) -> Identity {
        Identity {
            id: UserId(id),
            display_name: name.to_string(),
            avatar: format!("{}.jpg", name),
        }
    }

    fn hub_with(config: Config) -> Arc<ChatHub> {
        let mut directory = IdentityDirectory::new();
        directory.insert("t-7", identity(7, "alice"));
        directory.insert("t-12", identity(12, "bob"));
        Arc::new(ChatHub::new(
            Arc::new(MemoryStore::new()),
            Arc::new(directory),
            &config,
        ))
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_starts_anonymous() {
        let hub = hub_with(Config::default());
        let (tx, _rx) = mpsc::channel(8);
        let session = hub.open_session(tx);
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(session.identity().is_none());
    }

    #[tokio::test]
    async fn test_authenticate_event_transitions() {
        let hub = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);

        session
            .handle(ClientEvent::Authenticate {
                token: "t-7".to_string(),
            })
            .await;

        assert_eq!(session.identity().map(|i| i.id), Some(UserId(7)));
        assert!(hub.presence().is_online(UserId(7)));
        let events = drain(&mut rx);
        assert!(matches!(
            &events[0],
            ServerEvent::UserConnected { identity, .. } if identity == "alice"
        ));
        assert!(matches!(
            &events[1],
            ServerEvent::PublicHistory { messages } if messages.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_bad_token_reports_unauthorized() {
        let hub = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);

        session
            .handle(ClientEvent::Authenticate {
                token: "forged".to_string(),
            })
            .await;

        assert_eq!(session.state(), &SessionState::Anonymous);
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Error { code: ErrorCode::Unauthorized, .. }]
        ));
    }

    #[tokio::test]
    async fn test_second_authenticate_rejected() {
        let hub = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);
        session.authenticate_with(identity(7, "alice")).await.unwrap();
        drain(&mut rx);

        session
            .handle(ClientEvent::Authenticate {
                token: "t-12".to_string(),
            })
            .await;

        assert_eq!(session.identity().map(|i| i.id), Some(UserId(7)));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerEvent::Error { code: ErrorCode::AlreadyAuthenticated, .. }]
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_silent_by_default() {
        let hub = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);

        session
            .handle(ClientEvent::JoinPrivateRoom {
                other_identity: UserId(12),
            })
            .await;

        assert!(drain(&mut rx).is_empty());
        assert!(hub.router().rooms_of(session.id()).is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_explicit_when_configured() {
        let hub = hub_with(Config {
            explicit_auth_errors: true,
            ..Config::default()
        });
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);

        session
            .handle(ClientEvent::SendPublicMessage {
                content: "hi".to_string(),
            })
            .await;

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerEvent::Error { code: ErrorCode::Unauthorized, .. }]
        ));
    }

    #[tokio::test]
    async fn test_unknown_recipient_not_found() {
        let hub = hub_with(Config::default());
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);
        session.authenticate_with(identity(7, "alice")).await.unwrap();
        drain(&mut rx);

        session
            .handle(ClientEvent::SendPrivateMessage {
                recipient_identity: UserId(404),
                content: "hello?".to_string(),
            })
            .await;

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerEvent::Error { code: ErrorCode::NotFound, .. }]
        ));
        assert!(hub
            .store()
            .conversation_between(UserId(7), UserId(404), 50)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_leave_private_room() {
        let hub = hub_with(Config::default());
        let (tx, _rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);
        session.authenticate_with(identity(7, "alice")).await.unwrap();

        session
            .handle(ClientEvent::JoinPrivateRoom {
                other_identity: UserId(12),
            })
            .await;
        assert_eq!(hub.router().rooms_of(session.id()).len(), 1);

        session
            .handle(ClientEvent::LeavePrivateRoom {
                other_identity: UserId(12),
            })
            .await;
        assert!(hub.router().rooms_of(session.id()).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal() {
        let hub = hub_with(Config::default());
        let (tx, _rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);
        session.authenticate_with(identity(7, "alice")).await.unwrap();

        session.disconnect();
        assert_eq!(session.state(), &SessionState::Disconnected);
        assert!(!hub.presence().is_online(UserId(7)));
        assert!(!hub.bus().is_attached(session.id()));

        session
            .handle(ClientEvent::SendPublicMessage {
                content: "late".to_string(),
            })
            .await;
        assert!(hub.store().recent_public(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let hub = hub_with(Config::default());
        let (tx, _rx) = mpsc::channel(8);
        let mut session = hub.open_session(tx);
        session.authenticate_with(identity(12, "bob")).await.unwrap();
        let id = session.id();

        drop(session);
        assert!(!hub.bus().is_attached(id));
        assert!(!hub.presence().is_online(UserId(12)));
    }
}
