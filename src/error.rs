use crate::model::{ConversationId, MessageId, UserId};

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    /// Caller is authenticated but acting for someone else.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("participant mismatch: {0}")]
    ParticipantMismatch(String),

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("not registered")]
    NotRegistered,

    #[error("storage unavailable")]
    Store(#[from] sqlx::Error),

    #[error("delivery task failed")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Body or query string that doesn't deserialize.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ChatError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChatError::ConversationNotFound(_) | ChatError::UserNotFound(_) | ChatError::MessageNotFound(_)
        )
    }
}

/// Malformed frame on the real-time channel. Closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("binary frames are not supported")]
    Binary,

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
