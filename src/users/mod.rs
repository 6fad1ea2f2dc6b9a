mod directory;

use async_trait::async_trait;
use axum::{Router, debug_handler, extract::State, routing::get};
use serde::Deserialize;

use crate::{
    AppResult, AppState,
    error::{ChatError, ChatResult},
    extract::{Json, Query},
    model::{User, UserId},
};

pub use directory::SqliteDirectory;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> ChatResult<Option<User>>;
    async fn search(&self, term: &str) -> ChatResult<Vec<User>>;
    async fn list_all(&self) -> ChatResult<Vec<User>>;
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/all", get(all))
        .route("/user-id", get(by_id))
        .route("/search", get(search))
}

#[derive(Deserialize)]
pub(crate) struct IdQuery {
    id: UserId,
}

#[derive(Deserialize)]
pub(crate) struct SearchQuery {
    term: String,
}

#[debug_handler]
pub(crate) async fn all(State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.directory.list_all().await?))
}

#[debug_handler]
pub(crate) async fn by_id(
    State(state): State<AppState>,
    Query(IdQuery { id }): Query<IdQuery>,
) -> AppResult<Json<User>> {
    let user = state.directory.find_by_id(id).await?.ok_or(ChatError::UserNotFound(id))?;
    Ok(Json(user))
}

#[debug_handler]
pub(crate) async fn search(
    State(state): State<AppState>,
    Query(SearchQuery { term }): Query<SearchQuery>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.directory.search(&term).await?))
}
