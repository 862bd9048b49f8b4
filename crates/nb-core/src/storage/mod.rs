//! Storage layer
//!
//! One relational backend (MySQL or SQLite) and one cache backend (Redis or
//! SQLite emulating hashes), chosen once when [`Storage`] is built. Callers go
//! through [`Query`] and [`Cache`] and never see which backend is active.

pub mod cache;
pub mod mysql;
pub mod query;
pub mod redis;
pub mod sqlite;

pub use cache::Cache;
pub use mysql::MySqlDatabase;
pub use query::{Direction, Operator, Outcome, Query, Statement};
pub use redis::RedisCache;
pub use sqlite::{SqliteCache, SqliteDatabase};

use crate::error::{NbError, Result};
use async_trait::async_trait;
use nb_types::Config;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A result row, column name to value
pub type Row = serde_json::Map<String, Value>;

pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Relational driver capability: run parameterized SQL, `?` placeholders
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Returns the number of affected rows
    async fn execute_exec(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Single unparameterized statement (DDL)
    async fn execute_script(&self, sql: &str) -> Result<()>;
}

/// Two-level (namespace, key) string store
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool>;
}

/// Connection registry: the live relational and cache connections
#[derive(Clone)]
pub struct Storage {
    database: Arc<dyn RelationalBackend>,
    cache: Arc<dyn CacheBackend>,
    timeout: Duration,
}

impl Storage {
    pub fn new(database: Arc<dyn RelationalBackend>, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            database,
            cache,
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect the backends named in the configuration.
    ///
    /// MySQL takes precedence over SQLite for the relational role and Redis
    /// over SQLite for the cache role. A role with nothing configured is a
    /// [`NbError::NotInitialized`] error.
    pub async fn connect(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.backend_timeout);

        let database: Arc<dyn RelationalBackend> = if let Some(mysql) = &config.database.mysql {
            Arc::new(bounded(timeout, "connect mysql", MySqlDatabase::connect(mysql)).await?)
        } else if let Some(sqlite) = &config.database.sqlite {
            let connecting = SqliteDatabase::connect(&sqlite.path);
            Arc::new(bounded(timeout, "connect sqlite", connecting).await?)
        } else {
            return Err(NbError::NotInitialized("database".to_string()));
        };

        let cache: Arc<dyn CacheBackend> = if let Some(redis) = &config.cache_database.redis {
            Arc::new(bounded(timeout, "connect redis", RedisCache::connect(redis)).await?)
        } else if let Some(sqlite) = &config.cache_database.sqlite {
            let connecting = SqliteCache::connect(&sqlite.path);
            Arc::new(bounded(timeout, "connect sqlite cache", connecting).await?)
        } else {
            return Err(NbError::NotInitialized("cacheDatabase".to_string()));
        };

        info!(
            "Storage ready: database={}, cache={}",
            database.kind(),
            cache.kind()
        );

        Ok(Self::new(database, cache).with_timeout(timeout))
    }

    /// Run a DDL script statement by statement
    pub async fn initialize_schema(&self, script: &str) -> Result<()> {
        for statement in split_script(script) {
            bounded(
                self.timeout,
                "initialize schema",
                self.database.execute_script(statement),
            )
            .await?;
        }
        info!("Data tables initialized");
        Ok(())
    }

    /// Fresh query builder with no table bound
    pub fn database(&self) -> Query {
        Query::new(self.database.clone(), self.timeout)
    }

    /// Fresh cache accessor with no namespace bound
    pub fn cache(&self) -> Cache {
        Cache::new(self.cache.clone(), self.timeout)
    }

    pub fn database_kind(&self) -> &'static str {
        self.database.kind()
    }

    pub fn cache_kind(&self) -> &'static str {
        self.cache.kind()
    }
}

/// Await a backend call, giving up after `limit`
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(NbError::Timeout(operation.to_string())),
    }
}

/// Split a DDL script on `;`, dropping blank statements and `--` comment lines
pub fn split_script(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| {
            statement
                .lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with("--"))
        })
        .collect()
}

/// Backtick-quote an identifier, valid in both MySQL and SQLite
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_script() {
        let script = r#"
            -- tags
            CREATE TABLE IF NOT EXISTS tags (id TEXT PRIMARY KEY);

            -- trailing comment only
            ;
            CREATE INDEX IF NOT EXISTS idx ON tags (id);
        "#;
        let statements = split_script(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE"));
        assert!(statements[1].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("tags"), "`tags`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[tokio::test]
    async fn test_bounded_timeout() {
        let result: Result<()> = bounded(Duration::from_millis(10), "sleep", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(NbError::Timeout(op)) if op == "sleep"));
    }

    #[tokio::test]
    async fn test_connect_requires_backends() {
        let mut config = Config::default();
        config.cache_database.sqlite = Some(nb_types::SqliteConfig {
            path: ":memory:".to_string(),
        });
        let err = Storage::connect(&config).await.err().unwrap();
        assert!(matches!(err, NbError::NotInitialized(role) if role == "database"));
    }

    #[tokio::test]
    async fn test_initialize_schema_on_sqlite() {
        let storage = Storage::new(
            Arc::new(SqliteDatabase::connect_in_memory().await.unwrap()),
            Arc::new(SqliteCache::connect_in_memory().await.unwrap()),
        );
        storage
            .initialize_schema(
                "CREATE TABLE IF NOT EXISTS tags (id TEXT PRIMARY KEY, name TEXT NOT NULL, color TEXT NOT NULL);",
            )
            .await
            .unwrap();

        let exists = storage
            .database()
            .table("tags")
            .unwrap()
            .exist()
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert!(!exists);
        assert_eq!(storage.database_kind(), "sqlite");
        assert_eq!(storage.cache_kind(), "sqlite");
    }
}
