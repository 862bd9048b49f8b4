//! Access extractor for handlers behind the guard middleware

use crate::error::ApiError;
use axum::{extract::FromRequestParts, http::request::Parts};
use nb_core::Access;
use nb_types::ErrorCode;

/// The [`Access`] resolved by the guard middleware for this request
#[derive(Debug, Clone)]
pub struct RequestAccess(pub Access);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestAccess
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Access>()
            .cloned()
            .map(RequestAccess)
            .ok_or_else(|| {
                ApiError::from_code(ErrorCode::NotInitialized)
                    .with_param("resource", "access")
                    .with_resource(parts.uri.path().to_string())
            })
    }
}

impl std::ops::Deref for RequestAccess {
    type Target = Access;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
