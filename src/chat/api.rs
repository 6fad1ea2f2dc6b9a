use std::sync::Arc;

use axum::{debug_handler, extract::State};
use serde::{Deserialize, Serialize};

use crate::{
    AppResult, AppState,
    auth::AuthUser,
    error::{ChatError, ChatResult},
    extract::{Json, Query},
    gateway::{Rooms, ServerEvent},
    model::{Conversation, ConversationId, ConversationResult, Message, MessageId, UnreadMessages, UserId},
};

use super::{Relay, Resolver};

/// Callers may only act as themselves.
fn ensure_caller(caller: UserId, declared: UserId) -> ChatResult<()> {
    if caller != declared {
        return Err(ChatError::Forbidden(format!("authenticated as {caller}, not {declared}")));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserQuery {
    user_id: Option<UserId>,
}

#[derive(Deserialize)]
pub(crate) struct ConversationQuery {
    id: ConversationId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateConversationBody {
    client_id1: UserId,
    client_id2: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageBody {
    conversation_id: ConversationId,
    message: String,
    sender_id: UserId,
    receiver_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkReadBody {
    conversation_id: ConversationId,
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteMessageBody {
    message_id: MessageId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeactivateBody {
    conversation_id: ConversationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub success: bool,
    pub updated: u64,
}

#[debug_handler(state = AppState)]
pub(crate) async fn conversations(
    AuthUser(caller): AuthUser,
    State(resolver): State<Resolver>,
    Query(UserQuery { user_id }): Query<UserQuery>,
) -> AppResult<Json<Vec<Conversation>>> {
    let user_id = user_id.unwrap_or(caller);
    ensure_caller(caller, user_id)?;
    Ok(Json(resolver.conversations_for(user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_conversation(
    AuthUser(caller): AuthUser,
    State(resolver): State<Resolver>,
    Json(CreateConversationBody { client_id1, client_id2 }): Json<CreateConversationBody>,
) -> AppResult<Json<Conversation>> {
    if caller != client_id1 && caller != client_id2 {
        return Err(ChatError::Forbidden(format!("user {caller} is not one of the requested participants")).into());
    }
    Ok(Json(resolver.resolve(client_id1, client_id2).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn conversation(
    AuthUser(caller): AuthUser,
    State(resolver): State<Resolver>,
    Query(ConversationQuery { id }): Query<ConversationQuery>,
) -> AppResult<Json<ConversationResult>> {
    let result = resolver.fetch_with_history(id).await?;
    if !result.conversation.has_participant(caller) {
        return Err(ChatError::Forbidden(format!("user {caller} is not part of conversation {id}")).into());
    }
    Ok(Json(result))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send_message(
    AuthUser(caller): AuthUser,
    State(relay): State<Relay>,
    State(rooms): State<Arc<Rooms>>,
    Json(SendMessageBody { conversation_id, message, sender_id, receiver_id }): Json<SendMessageBody>,
) -> AppResult<Json<Message>> {
    ensure_caller(caller, sender_id)?;
    let delivery = relay.deliver(conversation_id, sender_id, receiver_id, &message).await?;
    // sockets watching the conversation see HTTP sends too
    rooms.broadcast(
        conversation_id,
        &ServerEvent::NewMessage(delivery.message.clone()),
        delivery.pushed_to,
    );
    Ok(Json(delivery.message))
}

#[debug_handler(state = AppState)]
pub(crate) async fn unread_messages(
    AuthUser(caller): AuthUser,
    State(relay): State<Relay>,
    Query(UserQuery { user_id }): Query<UserQuery>,
) -> AppResult<Json<UnreadMessages>> {
    let user_id = user_id.unwrap_or(caller);
    ensure_caller(caller, user_id)?;
    Ok(Json(relay.unread_for(user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn mark_as_read(
    AuthUser(caller): AuthUser,
    State(relay): State<Relay>,
    Json(MarkReadBody { conversation_id, user_id }): Json<MarkReadBody>,
) -> AppResult<Json<MarkReadResponse>> {
    ensure_caller(caller, user_id)?;
    let updated = relay.mark_read(conversation_id, user_id).await?;
    Ok(Json(MarkReadResponse { success: true, updated }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_message(
    AuthUser(caller): AuthUser,
    State(relay): State<Relay>,
    Json(DeleteMessageBody { message_id }): Json<DeleteMessageBody>,
) -> AppResult<Json<Message>> {
    Ok(Json(relay.delete(message_id, caller).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn deactivate_conversation(
    AuthUser(caller): AuthUser,
    State(resolver): State<Resolver>,
    Json(DeactivateBody { conversation_id }): Json<DeactivateBody>,
) -> AppResult<Json<Conversation>> {
    let conversation = resolver.conversation(conversation_id).await?;
    resolver.other_participant(&conversation, caller)?;
    Ok(Json(resolver.deactivate(conversation_id).await?))
}
