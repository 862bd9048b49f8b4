//! MySQL relational backend

use super::{RelationalBackend, Row};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use nb_types::MySqlConfig;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::types::{Decimal, Json};
use sqlx::{Column, MySql, MySqlPool, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    pub async fn connect(config: &MySqlConfig) -> Result<Self> {
        info!(
            "Connecting to MySQL at {}:{}/{}",
            config.host, config.port, config.database
        );

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("MySQL connection established");
        Ok(Self { pool })
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else {
                    query.bind(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// How a MySQL column is turned into JSON, keyed on its declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Decimal,
    Date,
    Time,
    Json,
    Scalar,
}

impl ColumnKind {
    fn of(type_name: &str) -> Self {
        match type_name {
            name if name.starts_with("DECIMAL") => ColumnKind::Decimal,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "JSON" => ColumnKind::Json,
            _ => ColumnKind::Scalar,
        }
    }
}

/// Integral decimals become integers and fractional ones floats, matching
/// what SQLite hands back for the same aggregate. Values that fit neither
/// keep their exact text.
fn decimal_value(text: &str) -> Value {
    if !text.contains('.') {
        if let Ok(i) = text.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(u) = text.parse::<u64>() {
            return Value::from(u);
        }
        return Value::String(text.to_string());
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn decode_scalar(row: &MySqlRow, index: usize) -> Result<Value> {
    let value = if let Ok(i) = row.try_get::<i64, _>(index) {
        Value::from(i)
    } else if let Ok(u) = row.try_get::<u64, _>(index) {
        Value::from(u)
    } else if let Ok(f) = row.try_get::<f64, _>(index) {
        Value::from(f)
    } else if let Ok(s) = row.try_get::<String, _>(index) {
        Value::String(s)
    } else if let Ok(t) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        Value::String(t.to_string())
    } else {
        // ENUM, SET, BIT, GEOMETRY and friends: keep the wire bytes as text
        let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    };
    Ok(value)
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            match ColumnKind::of(column.type_info().name()) {
                ColumnKind::Decimal => {
                    let decimal: Decimal = row.try_get(index)?;
                    decimal_value(&decimal.to_string())
                }
                ColumnKind::Date => {
                    let date: NaiveDate = row.try_get(index)?;
                    Value::String(date.to_string())
                }
                ColumnKind::Time => {
                    let time: NaiveTime = row.try_get(index)?;
                    Value::String(time.to_string())
                }
                ColumnKind::Json => row.try_get::<Json<Value>, _>(index)?.0,
                ColumnKind::Scalar => decode_scalar(row, index)?,
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[async_trait]
impl RelationalBackend for MySqlDatabase {
    fn kind(&self) -> &'static str {
        "mysql"
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql, "mysql query");
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute_exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(sql, "mysql exec");
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
