//! Session types

use serde::{Deserialize, Deserializer, Serialize};

/// Cache namespace holding session records
pub const SESSION_NAMESPACE: &str = "nb_music_session";

/// Session lifetime granted on login and renewal (10 days)
pub const SESSION_LIFETIME_SECS: i64 = 10 * 24 * 60 * 60;

/// Sessions closer than this to expiry should be renewed (2 days)
pub const SESSION_RENEWAL_WINDOW_SECS: i64 = 2 * 24 * 60 * 60;

/// Session record stored as JSON in the cache, keyed by bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(deserialize_with = "user_id_from_string_or_number")]
    pub user_id: String,
    /// Unix seconds
    pub expires_in: i64,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, expires_in: i64) -> Self {
        Self {
            user_id: user_id.into(),
            expires_in,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_in <= now
    }
}

// Older records carry the numeric bilibili mid.
fn user_id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UserId {
        Text(String),
        Number(i64),
    }

    Ok(match UserId::deserialize(deserializer)? {
        UserId::Text(s) => s,
        UserId::Number(n) => n.to_string(),
    })
}
