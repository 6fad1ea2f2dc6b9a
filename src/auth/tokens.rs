use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};

use crate::{
    error::{ChatError, ChatResult},
    model::{UserId, to_micros},
};

use super::IdentityProvider;

const TOKEN_LEN: usize = 48;

/// Opaque access tokens kept in the `tokens` table.
#[derive(Clone)]
pub struct TokenIdentity {
    db_pool: SqlitePool,
}

impl TokenIdentity {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn issue(&self, user_id: UserId, ttl: Duration) -> ChatResult<String> {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let now = OffsetDateTime::now_utc();

        sqlx::query("INSERT INTO tokens (access_token,user_id,expires_at,is_revoked,created_at) VALUES (?,?,?,FALSE,?)")
            .bind(&token)
            .bind(user_id)
            .bind(to_micros(now + ttl))
            .bind(to_micros(now))
            .execute(&self.db_pool)
            .await?;

        tracing::info!(%user_id, "issued access token");
        Ok(token)
    }

    pub async fn revoke(&self, token: &str) -> ChatResult<bool> {
        let result = sqlx::query("UPDATE tokens SET is_revoked=TRUE WHERE access_token=?")
            .bind(token)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl IdentityProvider for TokenIdentity {
    async fn authenticate(&self, token: &str) -> ChatResult<UserId> {
        let row: Option<(UserId, i64, bool)> =
            sqlx::query_as("SELECT user_id,expires_at,is_revoked FROM tokens WHERE access_token=?")
                .bind(token)
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((user_id, expires_at, is_revoked)) = row else {
            return Err(ChatError::Unauthorized("invalid token"));
        };
        if is_revoked {
            return Err(ChatError::Unauthorized("token revoked"));
        }
        if expires_at <= to_micros(OffsetDateTime::now_utc()) {
            return Err(ChatError::Unauthorized("token expired"));
        }
        Ok(user_id)
    }
}
