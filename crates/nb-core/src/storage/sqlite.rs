//! Embedded SQLite backends
//!
//! `SqliteDatabase` serves the relational role. `SqliteCache` emulates the
//! hash store with one two-column table per namespace.

use super::{quote_identifier, CacheBackend, RelationalBackend, Row};
use crate::error::{NbError, Result};
use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

async fn open_pool(database_path: &str) -> Result<SqlitePool> {
    info!("Opening SQLite database at: {}", database_path);

    if let Some(parent) = std::path::Path::new(database_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

// A single connection that never expires, so every caller sees the same
// in-memory database.
async fn open_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else if let Ok(i) = row.try_get::<i64, _>(index) {
            Value::from(i)
        } else if let Ok(f) = row.try_get::<f64, _>(index) {
            Value::from(f)
        } else if let Ok(s) = row.try_get::<String, _>(index) {
            Value::String(s)
        } else {
            let bytes: Vec<u8> = row.try_get(index)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// SQLite file serving the relational role
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(database_path: &str) -> Result<Self> {
        let pool = open_pool(database_path).await?;
        info!("SQLite database connected");
        Ok(Self { pool })
    }

    pub async fn connect_in_memory() -> Result<Self> {
        Ok(Self {
            pool: open_memory_pool().await?,
        })
    }
}

#[async_trait]
impl RelationalBackend for SqliteDatabase {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql, "sqlite query");
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute_exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(sql, "sqlite exec");
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite file emulating the hash store, one table per namespace
pub struct SqliteCache {
    pool: SqlitePool,
    created: DashSet<String>,
}

impl SqliteCache {
    pub async fn connect(database_path: &str) -> Result<Self> {
        let pool = open_pool(database_path).await?;
        info!("SQLite cache connected");
        Ok(Self {
            pool,
            created: DashSet::new(),
        })
    }

    pub async fn connect_in_memory() -> Result<Self> {
        Ok(Self {
            pool: open_memory_pool().await?,
            created: DashSet::new(),
        })
    }

    /// Create the namespace table on first use and return its quoted name
    async fn ensure_namespace(&self, namespace: &str) -> Result<String> {
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(NbError::usage(format!(
                "invalid cache namespace: {namespace:?}"
            )));
        }

        let table = quote_identifier(namespace);
        if !self.created.contains(namespace) {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (cacheName TEXT PRIMARY KEY NOT NULL, cacheValue TEXT NOT NULL)"
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
            self.created.insert(namespace.to_string());
            debug!(namespace, "cache namespace table ready");
        }
        Ok(table)
    }
}

#[async_trait]
impl CacheBackend for SqliteCache {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let table = self.ensure_namespace(namespace).await?;
        let sql = format!("SELECT cacheValue FROM {table} WHERE cacheName = ? LIMIT 1");
        let value: Option<String> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let table = self.ensure_namespace(namespace).await?;

        let probe = format!("SELECT 1 FROM {table} WHERE cacheName = ? LIMIT 1");
        let present = sqlx::query(&probe)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        let sql = if present {
            format!("UPDATE {table} SET cacheValue = ? WHERE cacheName = ?")
        } else {
            format!("INSERT INTO {table} (cacheValue, cacheName) VALUES (?, ?)")
        };
        sqlx::query(&sql)
            .bind(value)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let table = self.ensure_namespace(namespace).await?;
        let sql = format!("DELETE FROM {table} WHERE cacheName = ?");
        sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }
}
