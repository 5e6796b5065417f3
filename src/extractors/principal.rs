//! Extract the acting user id from the request (`X-User-ID` header).

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated user id, set by the fronting auth layer.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Optional user id from `X-User-ID`. Absent or blank means anonymous.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(CurrentUser(value))
    }
}
