use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(UserId);
id_type!(ConversationId);
id_type!(MessageId);

/// Directory record. The core never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub description: Option<String>,
    /// Whoever resolved the pair first. Carries no meaning beyond that.
    pub creator_id: UserId,
    pub participant_id: UserId,
    pub is_active: bool,
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    pub fn participants(&self) -> (UserId, UserId) {
        (self.creator_id, self.participant_id)
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.creator_id == user_id || self.participant_id == user_id
    }

    /// The participant that isn't `user_id`, if `user_id` is one of them.
    pub fn other_participant(&self, user_id: UserId) -> Option<UserId> {
        if self.creator_id == user_id {
            Some(self.participant_id)
        } else if self.participant_id == user_id {
            Some(self.creator_id)
        } else {
            None
        }
    }

    /// True when `{a, b}` is exactly this conversation's pair, in either order.
    pub fn is_pair(&self, a: UserId, b: UserId) -> bool {
        (self.creator_id, self.participant_id) == (a, b) || (self.creator_id, self.participant_id) == (b, a)
    }
}

/// Label for the pair `{a, b}`. Same output for either argument order.
pub fn conversation_title(a: UserId, b: UserId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("dm:{low}:{high}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResult {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadMessages {
    pub messages: Vec<Message>,
    pub count: usize,
}

/// Timestamps are stored as unix microseconds so they sort as integers.
pub(crate) fn to_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}

pub(crate) fn from_micros(micros: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
