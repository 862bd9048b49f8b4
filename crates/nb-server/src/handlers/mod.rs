//! HTTP handlers

pub mod auth;
pub mod tags;
pub mod webhook;

use crate::error::ApiError;
use axum::{
    extract::OriginalUri,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// `/v1/*`: clients this old must upgrade
pub async fn legacy_version() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "success": false,
            "error": {
                "code": 503,
                "message": "This client version is no longer supported, please update to the latest version"
            }
        })),
    )
        .into_response()
}

pub async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found().with_resource(uri.path().to_string())
}
