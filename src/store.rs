use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::OffsetDateTime;

use crate::{
    error::{ChatError, ChatResult},
    model::{
        Conversation, ConversationId, Message, MessageId, UserId, conversation_title, from_micros,
        to_micros,
    },
};

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let mut options = SqlitePoolOptions::new().max_connections(max_connections);
    if database_url.contains(":memory:") {
        // every pooled connection would otherwise get its own empty database
        options = options
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
    }
    let db_pool = options.connect(database_url).await?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    Ok(db_pool)
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    title: String,
    description: Option<String>,
    creator_id: i64,
    participant_id: i64,
    is_active: bool,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: ConversationId(row.id),
            title: row.title,
            description: row.description,
            creator_id: UserId(row.creator_id),
            participant_id: UserId(row.participant_id),
            is_active: row.is_active,
            metadata: row.metadata.and_then(|raw| match serde_json::from_str(&raw) {
                Ok(metadata) => Some(metadata),
                Err(err) => {
                    tracing::warn!(conversation_id = row.id, "ignoring unparseable metadata: {err}");
                    None
                }
            }),
            created_at: from_micros(row.created_at),
            updated_at: from_micros(row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    receiver_id: i64,
    message: String,
    is_read: bool,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: MessageId(row.id),
            conversation_id: ConversationId(row.conversation_id),
            sender_id: UserId(row.sender_id),
            receiver_id: UserId(row.receiver_id),
            message: row.message,
            is_read: row.is_read,
            created_at: from_micros(row.created_at),
            updated_at: from_micros(row.updated_at),
            deleted_at: row.deleted_at.map(from_micros),
        }
    }
}

const CONVERSATION_COLUMNS: &str =
    "id,title,description,creator_id,participant_id,is_active,metadata,created_at,updated_at";
const MESSAGE_COLUMNS: &str =
    "id,conversation_id,sender_id,receiver_id,message,is_read,created_at,updated_at,deleted_at";

/// Durable record of conversations and messages.
#[derive(Clone)]
pub struct Store {
    db_pool: SqlitePool,
}

impl Store {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    pub async fn conversation(&self, id: ConversationId) -> ChatResult<Option<Conversation>> {
        let row: Option<ConversationRow> =
            sqlx::query_as(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id=?"))
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(Conversation::from))
    }

    /// Looks the pair up in both column orders.
    pub async fn conversation_between(&self, a: UserId, b: UserId) -> ChatResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE (creator_id=? AND participant_id=?) OR (creator_id=? AND participant_id=?) \
             ORDER BY id LIMIT 1"
        ))
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row.map(Conversation::from))
    }

    /// Inserts the pair unless a row for it already exists, in either order.
    /// Returns whether this call created it.
    pub async fn insert_conversation(&self, creator: UserId, participant: UserId) -> ChatResult<bool> {
        let now = to_micros(OffsetDateTime::now_utc());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO conversations \
             (title,creator_id,participant_id,is_active,created_at,updated_at) VALUES (?,?,?,TRUE,?,?)",
        )
        .bind(conversation_title(creator, participant))
        .bind(creator)
        .bind(participant)
        .bind(now)
        .bind(now)
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn conversations_for(&self, user_id: UserId) -> ChatResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE creator_id=? OR participant_id=? ORDER BY updated_at DESC, id DESC"
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    pub async fn deactivate_conversation(&self, id: ConversationId) -> ChatResult<()> {
        let result = sqlx::query("UPDATE conversations SET is_active=FALSE, updated_at=? WHERE id=?")
            .bind(to_micros(OffsetDateTime::now_utc()))
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::ConversationNotFound(id));
        }
        Ok(())
    }

    /// Live messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: ConversationId) -> ChatResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id=? AND deleted_at IS NULL ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    pub async fn message(&self, id: MessageId) -> ChatResult<Option<Message>> {
        let row: Option<MessageRow> =
            sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id=?"))
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(Message::from))
    }

    /// Appends a message and bumps the conversation's `updated_at` in one transaction.
    pub async fn insert_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> ChatResult<Message> {
        let now = to_micros(OffsetDateTime::now_utc());
        let mut tx = self.db_pool.begin().await?;

        let row: MessageRow = sqlx::query_as(&format!(
            "INSERT INTO messages (conversation_id,sender_id,receiver_id,message,is_read,created_at,updated_at) \
             VALUES (?,?,?,?,FALSE,?,?) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(conversation_id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(body)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at=? WHERE id=?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    pub async fn unread_for(&self, user_id: UserId) -> ChatResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE receiver_id=? AND is_read=FALSE AND deleted_at IS NULL ORDER BY created_at ASC, id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// Flips `is_read` on everything in the conversation addressed to `user_id`.
    pub async fn mark_read(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read=TRUE, updated_at=? \
             WHERE conversation_id=? AND receiver_id=? AND is_read=FALSE",
        )
        .bind(to_micros(OffsetDateTime::now_utc()))
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn soft_delete_message(&self, id: MessageId) -> ChatResult<bool> {
        let now = to_micros(OffsetDateTime::now_utc());
        let result = sqlx::query("UPDATE messages SET deleted_at=?, updated_at=? WHERE id=? AND deleted_at IS NULL")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
