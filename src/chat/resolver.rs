use std::sync::Arc;

use crate::{
    error::{ChatError, ChatResult},
    model::{Conversation, ConversationId, ConversationResult, UserId},
    store::Store,
    users::UserDirectory,
};

/// Maps a pair of users onto their one conversation.
#[derive(Clone)]
pub struct Resolver {
    store: Store,
    directory: Arc<dyn UserDirectory>,
}

impl Resolver {
    pub fn new(store: Store, directory: Arc<dyn UserDirectory>) -> Self {
        Self { store, directory }
    }

    /// Finds or creates the conversation between `a` and `b`. Argument order
    /// doesn't matter and repeated calls return the same row.
    pub async fn resolve(&self, a: UserId, b: UserId) -> ChatResult<Conversation> {
        if a == b {
            return Err(ChatError::InvalidPair(format!("user {a} cannot open a conversation with themselves")));
        }
        for id in [a, b] {
            if self.directory.find_by_id(id).await?.is_none() {
                return Err(ChatError::InvalidPair(format!("user {id} does not exist")));
            }
        }

        if let Some(existing) = self.store.conversation_between(a, b).await? {
            return Ok(existing);
        }

        // a concurrent resolve may win the insert; the pair index keeps it to one row
        let created = self.store.insert_conversation(a, b).await?;
        let conversation = self
            .store
            .conversation_between(a, b)
            .await?
            .ok_or(ChatError::Store(sqlx::Error::RowNotFound))?;

        if created {
            tracing::info!(conversation_id = %conversation.id, title = %conversation.title, "opened conversation");
        }
        Ok(conversation)
    }

    pub async fn conversation(&self, id: ConversationId) -> ChatResult<Conversation> {
        self.store.conversation(id).await?.ok_or(ChatError::ConversationNotFound(id))
    }

    /// The conversation and its messages, oldest first.
    pub async fn fetch_with_history(&self, id: ConversationId) -> ChatResult<ConversationResult> {
        let conversation = self.conversation(id).await?;
        let messages = self.store.messages(id).await?;
        Ok(ConversationResult { conversation, messages })
    }

    pub async fn conversations_for(&self, user_id: UserId) -> ChatResult<Vec<Conversation>> {
        self.store.conversations_for(user_id).await
    }

    pub fn other_participant(&self, conversation: &Conversation, user_id: UserId) -> ChatResult<UserId> {
        conversation.other_participant(user_id).ok_or_else(|| {
            ChatError::ParticipantMismatch(format!(
                "user {user_id} is not part of conversation {}",
                conversation.id
            ))
        })
    }

    pub async fn deactivate(&self, id: ConversationId) -> ChatResult<Conversation> {
        self.store.deactivate_conversation(id).await?;
        self.conversation(id).await
    }
}
