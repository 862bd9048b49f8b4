//! Redis cache backend: one hash per namespace, one field per key

use super::CacheBackend;
use crate::error::Result;
use async_trait::async_trait;
use nb_types::RedisConfig;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};
use tracing::info;

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        info!(
            "Connecting to Redis at {}:{} (db {})",
            config.host, config.port, config.database
        );

        let mut info = (config.host.as_str(), config.port).into_connection_info()?;
        info.redis.db = config.database;
        info.redis.username = config.username.clone();
        info.redis.password = config.password.clone();

        let client = redis::Client::open(info)?;
        let manager = ConnectionManager::new(client).await?;

        info!("Redis connection established");
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.hget(namespace, key).await?;
        Ok(value)
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(namespace, key, value).await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hdel(namespace, key).await?;
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let present: bool = conn.hexists(namespace, key).await?;
        Ok(present)
    }
}
