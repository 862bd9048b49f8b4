//! Configuration types
//!
//! Mirrors the layout of `config.json`. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_PATH: &str = "data/database.db";
pub const DEFAULT_CACHE_PATH: &str = "data/cache.db";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub trust_proxy: bool,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache_database: CacheDatabaseConfig,
    #[serde(default)]
    pub administrators: Administrators,
    #[serde(default)]
    pub speed_limit: SpeedLimitConfig,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// DDL script run at startup; the bundled script is used when unset
    #[serde(default)]
    pub schema_path: Option<String>,
    /// Upper bound for a single database or cache call, in seconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            trust_proxy: false,
            database: DatabaseConfig::default(),
            cache_database: CacheDatabaseConfig::default(),
            administrators: Administrators::default(),
            speed_limit: SpeedLimitConfig::default(),
            webhook: None,
            schema_path: None,
            backend_timeout: default_backend_timeout(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_backend_timeout() -> u64 {
    10
}

/// Relational store. MySQL wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub mysql: Option<MySqlConfig>,
    pub sqlite: Option<SqliteConfig>,
}

impl DatabaseConfig {
    pub fn is_empty(&self) -> bool {
        self.mysql.is_none() && self.sqlite.is_none()
    }
}

/// Key-value cache store. Redis wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDatabaseConfig {
    pub redis: Option<RedisConfig>,
    pub sqlite: Option<SqliteConfig>,
}

impl CacheDatabaseConfig {
    pub fn is_empty(&self) -> bool {
        self.redis.is_none() && self.sqlite.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MySqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn default_mysql_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: i64,
}

fn default_redis_port() -> u16 {
    6379
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
}

/// Who may use administrator routes: `true` for everyone, or a list of user ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Administrators {
    Flag(bool),
    List(Vec<String>),
}

impl Default for Administrators {
    fn default() -> Self {
        Administrators::List(Vec::new())
    }
}

impl Administrators {
    pub fn allows_everyone(&self) -> bool {
        matches!(self, Administrators::Flag(true))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        match self {
            Administrators::Flag(all) => *all,
            Administrators::List(ids) => ids.iter().any(|id| id == user_id),
        }
    }
}

/// Per-minute request thresholds and ban length (seconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeedLimitConfig {
    pub guest_max_speed: u32,
    pub user_max_speed: u32,
    pub ban_duration: u64,
}

impl Default for SpeedLimitConfig {
    fn default() -> Self {
        Self {
            guest_max_speed: 60,
            user_max_speed: 120,
            ban_duration: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub secret: String,
}
