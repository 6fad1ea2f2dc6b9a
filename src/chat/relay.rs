use std::sync::Arc;

use crate::{
    error::{ChatError, ChatResult},
    gateway::ServerEvent,
    model::{ConversationId, Message, MessageId, UnreadMessages, UserId},
    registry::{ConnectionRegistry, SessionId},
    store::Store,
};

/// A persisted message and the session it was pushed to, if any.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub pushed_to: Option<SessionId>,
}

/// Persists messages, then pushes them to the receiver's live session.
#[derive(Clone)]
pub struct Relay {
    store: Store,
    registry: Arc<ConnectionRegistry>,
}

impl Relay {
    pub fn new(store: Store, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn send(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> ChatResult<Message> {
        Ok(self.deliver(conversation_id, sender_id, receiver_id, body).await?.message)
    }

    /// Like [`Relay::send`], also reporting where the live push went. Once
    /// polled, the send runs to completion even if the caller is dropped.
    pub async fn deliver(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> ChatResult<Delivery> {
        let relay = self.clone();
        let body = body.to_owned();
        tokio::spawn(async move { relay.persist_and_push(conversation_id, sender_id, receiver_id, &body).await })
            .await?
    }

    async fn persist_and_push(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> ChatResult<Delivery> {
        if body.trim().is_empty() {
            return Err(ChatError::InvalidMessage("message is required"));
        }

        let conversation = self
            .store
            .conversation(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;

        if sender_id == receiver_id || !conversation.is_pair(sender_id, receiver_id) {
            return Err(ChatError::ParticipantMismatch(format!(
                "{sender_id} -> {receiver_id} does not match the participants of conversation {conversation_id}"
            )));
        }

        let message = self
            .store
            .insert_message(conversation_id, sender_id, receiver_id, body)
            .await?;

        // stored from here on; the push below is only a latency shortcut
        let pushed_to = self.registry.session_for(receiver_id).and_then(|session| {
            session
                .push(ServerEvent::NewMessage(message.clone()))
                .then(|| session.id())
        });

        tracing::debug!(
            message_id = %message.id,
            %conversation_id,
            online = pushed_to.is_some(),
            "relayed message"
        );
        Ok(Delivery { message, pushed_to })
    }

    pub async fn unread_for(&self, user_id: UserId) -> ChatResult<UnreadMessages> {
        let messages = self.store.unread_for(user_id).await?;
        Ok(UnreadMessages { count: messages.len(), messages })
    }

    /// Returns how many messages flipped. Calling it again flips none.
    pub async fn mark_read(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<u64> {
        let updated = self.store.mark_read(conversation_id, user_id).await?;
        if updated > 0 {
            tracing::debug!(%conversation_id, %user_id, updated, "marked read");
        }
        Ok(updated)
    }

    /// Soft delete. Only the sender may delete a message.
    pub async fn delete(&self, message_id: MessageId, requester: UserId) -> ChatResult<Message> {
        let message = self
            .store
            .message(message_id)
            .await?
            .filter(|m| m.deleted_at.is_none())
            .ok_or(ChatError::MessageNotFound(message_id))?;

        if message.sender_id != requester {
            return Err(ChatError::ParticipantMismatch(format!(
                "user {requester} did not send message {message_id}"
            )));
        }

        if !self.store.soft_delete_message(message_id).await? {
            return Err(ChatError::MessageNotFound(message_id));
        }
        self.store
            .message(message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))
    }
}
