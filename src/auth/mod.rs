mod bearer;
mod tokens;

use async_trait::async_trait;

use crate::{error::ChatResult, model::UserId};

pub use bearer::{AuthUser, bearer_token};
pub use tokens::TokenIdentity;

/// Validates bearer credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `ChatError::Unauthorized` for unknown, expired or revoked tokens.
    async fn authenticate(&self, token: &str) -> ChatResult<UserId>;
}
