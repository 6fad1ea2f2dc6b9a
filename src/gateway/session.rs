use std::collections::HashSet;

use crate::{
    AppState,
    error::{ChatError, ChatResult},
    model::{ConversationId, UserId},
    registry::SessionHandle,
};

use super::{
    ClientEvent, ServerEvent,
    protocol::{ConversationPayload, RegisterPayload, SendMessagePayload},
};

/// Connection lifecycle. `Connecting` ends at the upgrade: a socket only
/// exists once its credential has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Authenticated,
    Registered,
    Closed,
}

/// Per-socket state: who authenticated, whether they've registered, and
/// which rooms they've joined.
pub struct Connection {
    principal: UserId,
    handle: SessionHandle,
    state: ConnState,
    joined: HashSet<ConversationId>,
}

impl Connection {
    pub fn new(principal: UserId, handle: SessionHandle) -> Self {
        Self {
            principal,
            handle,
            state: ConnState::Authenticated,
            joined: HashSet::new(),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Applies one event and returns the acknowledgement for the caller.
    /// Domain errors become error acks; the connection stays usable.
    pub async fn apply(&mut self, state: &AppState, event: ClientEvent) -> ServerEvent {
        let name = event.name();
        match self.dispatch(state, event).await {
            Ok(message) => ServerEvent::success(name, message),
            Err(err) => {
                let session = self.handle.id();
                match &err {
                    ChatError::Store(source) => tracing::error!(%session, event = name, "store failure: {source}"),
                    ChatError::TaskFailed(source) => tracing::error!(%session, event = name, "{source}"),
                    _ => tracing::debug!(%session, event = name, "rejected: {err}"),
                }
                ServerEvent::error(name, err.to_string())
            }
        }
    }

    async fn dispatch(&mut self, state: &AppState, event: ClientEvent) -> ChatResult<String> {
        if self.state == ConnState::Closed {
            return Err(ChatError::NotRegistered);
        }
        match event {
            ClientEvent::Register(payload) => self.register(state, payload).await,
            ClientEvent::Logout => {
                self.close(state);
                Ok("Logged out".to_owned())
            }
            _ if self.state != ConnState::Registered => Err(ChatError::NotRegistered),
            ClientEvent::JoinConversation(payload) => self.join(state, payload).await,
            ClientEvent::SendMessage(payload) => self.send(state, payload).await,
            ClientEvent::MarkRead(ConversationPayload { conversation_id }) => {
                let updated = state.relay.mark_read(conversation_id, self.principal).await?;
                Ok(format!("Marked {updated} messages as read"))
            }
        }
    }

    async fn register(&mut self, state: &AppState, RegisterPayload { user_id }: RegisterPayload) -> ChatResult<String> {
        if user_id != self.principal {
            return Err(ChatError::Forbidden(format!(
                "cannot register as {user_id} while authenticated as {}",
                self.principal
            )));
        }
        if state.directory.find_by_id(user_id).await?.is_none() {
            return Err(ChatError::UserNotFound(user_id));
        }

        state.registry.register(user_id, self.handle.clone());
        self.state = ConnState::Registered;
        tracing::info!(%user_id, session = %self.handle.id(), "registered");
        Ok("User registered successfully".to_owned())
    }

    async fn join(
        &mut self,
        state: &AppState,
        ConversationPayload { conversation_id }: ConversationPayload,
    ) -> ChatResult<String> {
        let conversation = state.resolver.conversation(conversation_id).await?;
        state.resolver.other_participant(&conversation, self.principal)?;

        state.rooms.join(conversation_id, self.handle.clone());
        self.joined.insert(conversation_id);
        tracing::debug!(session = %self.handle.id(), %conversation_id, "joined room");
        Ok("Joined conversation".to_owned())
    }

    async fn send(&mut self, state: &AppState, payload: SendMessagePayload) -> ChatResult<String> {
        let SendMessagePayload { conversation_id, sender_id, receiver_id, message } = payload;

        if let Some(declared) = sender_id.filter(|declared| *declared != self.principal) {
            return Err(ChatError::ParticipantMismatch(format!(
                "sender {declared} is not the registered user {}",
                self.principal
            )));
        }

        let conversation = state.resolver.conversation(conversation_id).await?;
        let other = state.resolver.other_participant(&conversation, self.principal)?;
        let receiver_id = receiver_id.unwrap_or(other);

        let delivery = state
            .relay
            .deliver(conversation_id, self.principal, receiver_id, &message)
            .await?;

        let delivered = state.rooms.broadcast(
            conversation_id,
            &ServerEvent::NewMessage(delivery.message),
            delivery.pushed_to,
        );
        tracing::debug!(%conversation_id, room = delivered, direct = delivery.pushed_to.is_some(), "broadcast message");
        Ok("Message sent".to_owned())
    }

    /// Registered/Authenticated -> Closed. Safe to call more than once.
    pub fn close(&mut self, state: &AppState) {
        if self.state == ConnState::Closed {
            return;
        }
        if let Some(user_id) = state.registry.unregister(self.handle.id()) {
            tracing::info!(%user_id, session = %self.handle.id(), "unregistered");
        }
        state.rooms.leave_all(self.handle.id());
        self.joined.clear();
        self.state = ConnState::Closed;
    }
}
