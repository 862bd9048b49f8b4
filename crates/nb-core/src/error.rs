//! Error types for NB Music

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NbError>;

#[derive(Error, Debug)]
pub enum NbError {
    /// Builder or accessor called out of order
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Missing session token")]
    MissingToken,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("User {user_id} has no permission")]
    NoPermission { user_id: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Resource not initialized: {0}")]
    NotInitialized(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Backend call timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NbError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        NbError::Usage(message.into())
    }
}

impl From<sqlx::Error> for NbError {
    fn from(e: sqlx::Error) -> Self {
        NbError::Database(e.to_string())
    }
}

impl From<redis::RedisError> for NbError {
    fn from(e: redis::RedisError) -> Self {
        NbError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for NbError {
    fn from(e: serde_json::Error) -> Self {
        NbError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for NbError {
    fn from(e: std::io::Error) -> Self {
        NbError::Database(e.to_string())
    }
}
