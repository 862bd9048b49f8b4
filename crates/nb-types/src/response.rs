//! Response envelope and caller-visible error codes

use serde::{Deserialize, Serialize};

/// Body of every API response: `{status, message, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub status: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: ErrorCode::Success.status(),
            message: "Success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse {
    pub fn empty() -> Self {
        Self {
            status: ErrorCode::Success.status(),
            message: "Success".to_string(),
            data: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            message: message.into(),
            data: None,
        }
    }
}

/// Error code table shared with clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Success,
    Database,
    BadParams,
    UserNotFound,
    NotLoggedIn,
    ExternalService,
    NotFound,
    NoPermission,
    RateLimited,
    NotInitialized,
    Timeout,
}

impl ErrorCode {
    /// Value of the `status` field in the envelope
    pub fn status(self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Database => -1,
            ErrorCode::BadParams => -2,
            ErrorCode::UserNotFound => -3,
            ErrorCode::NotLoggedIn => -4,
            ErrorCode::ExternalService => -5,
            ErrorCode::NotFound => -6,
            ErrorCode::NoPermission => -7,
            ErrorCode::RateLimited => -8,
            ErrorCode::NotInitialized => -9,
            ErrorCode::Timeout => -10,
        }
    }

    /// HTTP status code sent along with the envelope
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::Success => 200,
            ErrorCode::Database => 500,
            ErrorCode::BadParams => 400,
            ErrorCode::UserNotFound | ErrorCode::NotFound => 404,
            ErrorCode::NotLoggedIn => 401,
            ErrorCode::ExternalService => 502,
            ErrorCode::NoPermission | ErrorCode::RateLimited => 403,
            ErrorCode::NotInitialized => 503,
            ErrorCode::Timeout => 504,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::Database => "Database error",
            ErrorCode::BadParams => "Invalid request parameters",
            ErrorCode::UserNotFound => "User does not exist",
            ErrorCode::NotLoggedIn => "Not logged in",
            ErrorCode::ExternalService => "External service error",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::NoPermission => "No permission",
            ErrorCode::RateLimited => "Too many requests, please try again later",
            ErrorCode::NotInitialized => "Resource not initialized",
            ErrorCode::Timeout => "Backend timed out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            ErrorCode::Database,
            ErrorCode::BadParams,
            ErrorCode::UserNotFound,
            ErrorCode::NotLoggedIn,
            ErrorCode::ExternalService,
            ErrorCode::NotFound,
            ErrorCode::NoPermission,
            ErrorCode::RateLimited,
            ErrorCode::NotInitialized,
            ErrorCode::Timeout,
        ];
        let pairs: std::collections::HashSet<_> =
            all.iter().map(|c| (c.status(), c.http_status())).collect();
        assert_eq!(pairs.len(), all.len());
    }

    #[test]
    fn test_envelope_shape() {
        let response = ApiResponse::failure(ErrorCode::RateLimited, "slow down");
        let body = serde_json::to_value(response).unwrap();
        assert_eq!(body["status"], -8);
        assert_eq!(body["message"], "slow down");
        assert!(body["data"].is_null());
    }
}
