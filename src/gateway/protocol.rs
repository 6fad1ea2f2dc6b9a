use axum::extract::ws::Message as WsMessage;
use serde::{Deserialize, Serialize};

use crate::{
    error::ProtocolError,
    model::{ConversationId, Message, UserId},
};

/// Frames a client may send, `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Register(RegisterPayload),
    JoinConversation(ConversationPayload),
    SendMessage(SendMessagePayload),
    MarkRead(ConversationPayload),
    Logout,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::JoinConversation(_) => "joinConversation",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::MarkRead(_) => "markRead",
            ClientEvent::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub conversation_id: ConversationId,
}

/// `senderId` and `receiverId` are optional: the sender is whoever registered
/// on this connection and the receiver is the other participant. When given
/// they have to agree with that.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub event: String,
    pub status: AckStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    Ack(Ack),
}

impl ServerEvent {
    pub fn success(event: &str, message: impl Into<String>) -> Self {
        ServerEvent::Ack(Ack {
            event: event.to_owned(),
            status: AckStatus::Success,
            message: message.into(),
        })
    }

    pub fn error(event: &str, message: impl Into<String>) -> Self {
        ServerEvent::Ack(Ack {
            event: event.to_owned(),
            status: AckStatus::Error,
            message: message.into(),
        })
    }
}

pub(crate) enum Inbound {
    Event(ClientEvent),
    Control,
    Close,
}

/// Validates one websocket frame. Anything that isn't a well-formed event is
/// a protocol error.
pub(crate) fn parse_frame(frame: WsMessage) -> Result<Inbound, ProtocolError> {
    match frame {
        WsMessage::Text(text) => Ok(Inbound::Event(serde_json::from_str(text.as_str())?)),
        WsMessage::Binary(_) => Err(ProtocolError::Binary),
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(Inbound::Control),
        WsMessage::Close(_) => Ok(Inbound::Close),
    }
}
