//! NB Music Core Library
//!
//! Storage abstraction (relational query builder and key-value cache accessor
//! over interchangeable backends), session resolution and per-IP rate limiting.

// Re-export pure types from nb-types
pub use nb_types::*;

pub mod error;
pub mod rate_limit;
pub mod session;
pub mod storage;

pub use error::{NbError, Result};
pub use rate_limit::{RateLimiter, RateRecord};
pub use session::{bearer_token, Access, Session, SessionResolver};
pub use storage::{Cache, Query, Storage};

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
