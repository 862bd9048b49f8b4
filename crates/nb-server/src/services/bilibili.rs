//! bilibili account lookup used by login

use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// bilibili answers `-101` when the cookie does not belong to a logged in account
const CODE_NOT_LOGGED_IN: i64 = -101;

#[derive(Debug, Error)]
pub enum BilibiliError {
    #[error("bilibili account not found")]
    UserNotFound,

    #[error("bilibili API returned {code}: {message}")]
    Api { code: i64, message: String },

    #[error("bilibili API request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BilibiliUser {
    pub mid: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NavResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<NavData>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    mid: Option<serde_json::Value>,
    uname: Option<String>,
}

pub struct BilibiliClient {
    http: reqwest::Client,
    nav_url: String,
}

impl BilibiliClient {
    pub fn new(timeout: Duration) -> Result<Self, BilibiliError> {
        Self::with_nav_url(NAV_URL, timeout)
    }

    pub fn with_nav_url(
        nav_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BilibiliError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            nav_url: nav_url.into(),
        })
    }

    /// Resolve the account behind a browser cookie string
    pub async fn current_user(&self, cookie: &str) -> Result<BilibiliUser, BilibiliError> {
        let response: NavResponse = self
            .http
            .get(&self.nav_url)
            .header(COOKIE, cookie)
            .header(REFERER, "https://www.bilibili.com")
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await?
            .json()
            .await?;

        debug!(code = response.code, "bilibili nav response");
        interpret(response)
    }
}

fn interpret(response: NavResponse) -> Result<BilibiliUser, BilibiliError> {
    if response.code == CODE_NOT_LOGGED_IN {
        return Err(BilibiliError::UserNotFound);
    }
    if response.code != 0 {
        return Err(BilibiliError::Api {
            code: response.code,
            message: response.message,
        });
    }

    let data = response.data.ok_or_else(|| BilibiliError::Api {
        code: 0,
        message: "missing data".to_string(),
    })?;

    let mid = match data.mid {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        _ => {
            return Err(BilibiliError::Api {
                code: 0,
                message: "missing mid".to_string(),
            })
        }
    };

    Ok(BilibiliUser {
        mid,
        name: data.uname,
    })
}
