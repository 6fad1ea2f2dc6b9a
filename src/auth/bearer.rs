use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::{AppError, AppState, error::ChatError, model::UserId};

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// `Authorization: Bearer <token>`, or `?token=` for clients that can't set
/// headers on a websocket upgrade.
pub fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned());

    from_header
        .or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.token)
        })
        .filter(|token| !token.is_empty())
}

/// The authenticated caller of a request.
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ChatError::Unauthorized("missing bearer token"))?;
        let user_id = state.identity.authenticate(&token).await?;
        Ok(AuthUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn reads_header_then_query() {
        let header = parts(
            Request::builder()
                .uri("/chat?token=fromquery")
                .header(AUTHORIZATION, "Bearer fromheader")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&header).as_deref(), Some("fromheader"));

        let query = parts(Request::builder().uri("/chat?token=fromquery").body(()).unwrap());
        assert_eq!(bearer_token(&query).as_deref(), Some("fromquery"));

        let neither = parts(Request::builder().uri("/chat").header(AUTHORIZATION, "Basic abc").body(()).unwrap());
        assert_eq!(bearer_token(&neither), None);
    }
}
