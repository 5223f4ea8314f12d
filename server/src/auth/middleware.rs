use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};

use crate::auth::{IdentityResolver, Principal};

/// Identity resolver stored in request extensions for the Principal extractor
#[derive(Clone)]
pub struct IdentityExtension(pub Arc<IdentityResolver>);

/// Extract the bearer token from an `Authorization` header value.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolves `Authorization: Bearer` through the same strategies used for
/// WebSocket connections.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resolver = parts
            .extensions
            .get::<IdentityExtension>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        resolver
            .0
            .authenticate(bearer_token(&parts.headers))
            .await
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}
