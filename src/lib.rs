pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod model;
pub mod registry;
pub mod store;
pub mod users;

use std::sync::Arc;

use axum::{
    Json, Router, debug_handler,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use auth::{IdentityProvider, TokenIdentity};
use chat::{Relay, Resolver};
use error::ChatError;
use gateway::Rooms;
use registry::ConnectionRegistry;
use store::Store;
use users::{SqliteDirectory, UserDirectory};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
    pub identity: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn UserDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<Rooms>,
    pub resolver: Resolver,
    pub relay: Relay,
}

impl AppState {
    /// Token identity and user directory both backed by `db_pool`.
    pub fn new(db_pool: SqlitePool) -> Self {
        let identity = Arc::new(TokenIdentity::new(db_pool.clone()));
        let directory = Arc::new(SqliteDirectory::new(db_pool.clone()));
        Self::with_providers(db_pool, identity, directory)
    }

    pub fn with_providers(
        db_pool: SqlitePool,
        identity: Arc<dyn IdentityProvider>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let store = Store::new(db_pool);
        let registry = Arc::new(ConnectionRegistry::new());
        let resolver = Resolver::new(store.clone(), directory.clone());
        let relay = Relay::new(store.clone(), registry.clone());

        Self {
            store,
            identity,
            directory,
            registry,
            rooms: Arc::new(Rooms::new()),
            resolver,
            relay,
        }
    }
}

pub fn app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", get(gateway::chat_ws))
        .nest("/api/chat", chat::router())
        .nest("/api/users", users::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    online: usize,
}

#[debug_handler(state = AppState)]
async fn health(State(registry): State<Arc<ConnectionRegistry>>) -> Json<Health> {
    Json(Health { status: "ok", online: registry.online_count() })
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        let Some(err) = self.0.downcast_ref::<ChatError>() else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match err {
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            ChatError::InvalidMessage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::InvalidPair(_)
            | ChatError::ParticipantMismatch(_)
            | ChatError::NotRegistered
            | ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("{:#}\n{}", self.0, self.0.backtrace());
            match self.0.downcast_ref::<ChatError>() {
                Some(err) => err.to_string(),
                None => "internal error".to_owned(),
            }
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(ChatError);
