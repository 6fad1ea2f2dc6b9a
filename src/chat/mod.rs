mod api;
mod relay;
mod resolver;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub use api::MarkReadResponse;
pub use relay::{Delivery, Relay};
pub use resolver::Resolver;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(api::conversations))
        .route("/conversation", get(api::conversation).post(api::create_conversation))
        .route("/message", post(api::send_message))
        .route("/unread-messages", get(api::unread_messages))
        .route("/mark-as-read", post(api::mark_as_read))
        .route("/delete-message", post(api::delete_message))
        .route("/deactivate-conversation", post(api::deactivate_conversation))
}
