//! Request-boundary error type
//!
//! Every handler and the guard middleware fail with [`ApiError`]. The client
//! only sees the `{status, message, data}` envelope; the resource path and
//! parameters go to the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nb_core::NbError;
use nb_types::{ApiResponse, ErrorCode};
use thiserror::Error;
use tracing::{error, warn};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Request path or logical resource that failed
    pub resource: Option<String>,
    pub params: Vec<(&'static str, String)>,
    /// Underlying cause, logged but never sent to the client
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resource: None,
            params: Vec::new(),
            detail: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn bad_params() -> Self {
        Self::from_code(ErrorCode::BadParams)
    }

    pub fn not_found() -> Self {
        Self::from_code(ErrorCode::NotFound)
    }

    pub fn user_not_found() -> Self {
        Self::from_code(ErrorCode::UserNotFound)
    }

    pub fn external(service: &str, detail: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::ExternalService)
            .with_param("service", service)
            .with_detail(detail)
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log(&self) {
        let resource = self.resource.as_deref().unwrap_or("-");
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        let detail = self.detail.as_deref().unwrap_or("");

        if self.code.http_status() >= 500 {
            error!(
                code = self.code.status(),
                resource,
                params = %params,
                detail = %detail,
                "{}",
                self.message
            );
        } else {
            warn!(
                code = self.code.status(),
                resource,
                params = %params,
                detail = %detail,
                "{}",
                self.message
            );
        }
    }
}

impl From<NbError> for ApiError {
    fn from(e: NbError) -> Self {
        match e {
            NbError::MissingToken => ApiError::bad_params().with_detail("missing session token"),
            NbError::NotLoggedIn => ApiError::from_code(ErrorCode::NotLoggedIn),
            NbError::NoPermission { user_id } => {
                ApiError::from_code(ErrorCode::NoPermission).with_param("userId", user_id)
            }
            NbError::RateLimited => ApiError::from_code(ErrorCode::RateLimited),
            NbError::NotInitialized(resource) => {
                ApiError::from_code(ErrorCode::NotInitialized).with_param("resource", resource)
            }
            NbError::Timeout(operation) => {
                ApiError::from_code(ErrorCode::Timeout).with_param("operation", operation)
            }
            other @ (NbError::Usage(_) | NbError::Database(_) | NbError::Serialization(_)) => {
                ApiError::from_code(ErrorCode::Database).with_detail(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let body = ApiResponse::failure(self.code, self.message.clone());
        (self.status_code(), Json(body)).into_response()
    }
}

/// Attach request context to a failed core call
pub trait ApiResultExt<T> {
    fn at(self, resource: &str) -> ApiResult<T>;

    fn at_table(self, resource: &str, table: &str) -> ApiResult<T>;
}

impl<T, E: Into<ApiError>> ApiResultExt<T> for Result<T, E> {
    fn at(self, resource: &str) -> ApiResult<T> {
        self.map_err(|e| e.into().with_resource(resource))
    }

    fn at_table(self, resource: &str, table: &str) -> ApiResult<T> {
        self.map_err(|e| e.into().with_resource(resource).with_param("table", table))
    }
}
