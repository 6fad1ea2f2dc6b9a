use async_trait::async_trait;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    error::ChatResult,
    model::{User, UserId, from_micros, to_micros},
};

use super::UserDirectory;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            created_at: from_micros(row.created_at),
        }
    }
}

/// User records kept in the `users` table.
#[derive(Clone)]
pub struct SqliteDirectory {
    db_pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn insert(&self, first_name: &str, last_name: &str, email: &str) -> ChatResult<User> {
        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (first_name,last_name,email,created_at) VALUES (?,?,?,?) \
             RETURNING id,first_name,last_name,email,created_at",
        )
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(to_micros(OffsetDateTime::now_utc()))
        .fetch_one(&self.db_pool)
        .await?;

        tracing::info!(user_id = row.id, "added user {first_name} {last_name}");
        Ok(row.into())
    }
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl UserDirectory for SqliteDirectory {
    async fn find_by_id(&self, id: UserId) -> ChatResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id,first_name,last_name,email,created_at FROM users WHERE id=?")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(User::from))
    }

    async fn search(&self, term: &str) -> ChatResult<Vec<User>> {
        let pattern = like_pattern(term.trim());
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id,first_name,last_name,email,created_at FROM users \
             WHERE first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\' ORDER BY id",
        )
        .bind(pattern)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn list_all(&self) -> ChatResult<Vec<User>> {
        let rows: Vec<UserRow> =
            sqlx::query_as("SELECT id,first_name,last_name,email,created_at FROM users ORDER BY id")
                .fetch_all(&self.db_pool)
                .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::memory_pool;

    #[tokio::test]
    async fn search_matches_either_name_case_insensitively() {
        let directory = SqliteDirectory::new(memory_pool().await);
        let ann = directory.insert("Ann", "Lee", "ann@example.com").await.unwrap();
        let bob = directory.insert("Bob", "Annesley", "bob@example.com").await.unwrap();
        directory.insert("Cy", "Moss", "cy@example.com").await.unwrap();

        let found: Vec<_> = directory.search("ann").await.unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(found, vec![ann.id, bob.id]);

        assert!(directory.search("100%").await.unwrap().is_empty());
        assert_eq!(directory.list_all().await.unwrap().len(), 3);
        assert_eq!(directory.find_by_id(bob.id).await.unwrap().unwrap().email, "bob@example.com");
        assert!(directory.find_by_id(UserId(99)).await.unwrap().is_none());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a_b%"), "%a\\_b\\%%");
    }
}
