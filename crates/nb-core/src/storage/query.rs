//! Relational query builder
//!
//! [`Query`] is an immutable value: every builder call returns a new query and
//! leaves the receiver untouched, so a partially built query can be reused as
//! a base for several statements.
//!
//! ```ignore
//! let tags = storage.database().table("tags")?;
//! let page = tags
//!     .where_like("name", "%rock%")?
//!     .order("name", Direction::Asc)?
//!     .page(15, 2)?
//!     .select()
//!     .await?
//!     .into_inner()?;
//! ```

use super::{bounded, quote_identifier, RelationalBackend, Row};
use crate::error::{NbError, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Comparison operator of a WHERE condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }

    /// Recognize an operator written as SQL text, e.g. `">="` or `"not like"`
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "LIKE" => Operator::Like,
            "NOT LIKE" => Operator::NotLike,
            _ => return None,
        };
        Some(op)
    }

    fn is_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    operator: Operator,
    value: Value,
    or: bool,
}

/// Generated SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }
}

/// Result of a terminal operation: the executed value, or in fetch-SQL mode
/// the statement that would have run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Sql(Statement),
}

impl<T> Outcome<T> {
    /// The executed value; a fetch-SQL statement here is a usage error
    pub fn into_inner(self) -> Result<T> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::Sql(statement) => Err(NbError::usage(format!(
                "query was not executed (fetch-SQL mode): {}",
                statement.sql
            ))),
        }
    }

    pub fn sql(&self) -> Option<&Statement> {
        match self {
            Outcome::Sql(statement) => Some(statement),
            Outcome::Done(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Sql(statement) => Outcome::Sql(statement),
        }
    }
}

#[derive(Clone)]
pub struct Query {
    backend: Arc<dyn RelationalBackend>,
    timeout: Duration,
    table: Option<String>,
    conditions: Vec<Condition>,
    fields: Vec<String>,
    orders: Vec<(String, Direction)>,
    limit: Option<(u64, u64)>,
    fetch_sql: bool,
    unconditional: bool,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("backend", &self.backend.kind())
            .field("table", &self.table)
            .field("conditions", &self.conditions)
            .field("fields", &self.fields)
            .field("orders", &self.orders)
            .field("limit", &self.limit)
            .field("fetch_sql", &self.fetch_sql)
            .finish()
    }
}

impl Query {
    pub(crate) fn new(backend: Arc<dyn RelationalBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            table: None,
            conditions: Vec::new(),
            fields: Vec::new(),
            orders: Vec::new(),
            limit: None,
            fetch_sql: false,
            unconditional: false,
        }
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    fn require_table(&self, call: &str) -> Result<&str> {
        self.table
            .as_deref()
            .ok_or_else(|| NbError::usage(format!("{call} called before a table was set")))
    }

    /// Bind the table; fails if one is already bound
    pub fn table(&self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if let Some(existing) = &self.table {
            return Err(NbError::usage(format!(
                "table already set to {existing}, cannot set it to {name}"
            )));
        }
        if name.is_empty() {
            return Err(NbError::usage("table name must not be empty"));
        }
        let mut next = self.clone();
        next.table = Some(name);
        Ok(next)
    }

    fn push_condition(
        &self,
        field: &str,
        operator: Operator,
        value: Value,
        or: bool,
    ) -> Result<Self> {
        self.require_table("where")?;
        let mut next = self.clone();
        next.conditions.push(Condition {
            field: field.to_string(),
            operator,
            value,
            or,
        });
        Ok(next)
    }

    /// `field = value`, joined with AND
    pub fn where_eq(&self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.push_condition(field, Operator::Eq, value.into(), false)
    }

    pub fn where_op(
        &self,
        field: &str,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.push_condition(field, operator, value.into(), false)
    }

    /// Like [`Query::where_op`] with the operator written as SQL text, e.g.
    /// `where_expr("plays", ">=", 10)`
    pub fn where_expr(&self, field: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.push_condition(field, parse_operator(operator)?, value.into(), false)
    }

    pub fn or_where_expr(
        &self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.push_condition(field, parse_operator(operator)?, value.into(), true)
    }

    pub fn or_where_eq(&self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.push_condition(field, Operator::Eq, value.into(), true)
    }

    pub fn or_where_op(
        &self,
        field: &str,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.push_condition(field, operator, value.into(), true)
    }

    pub fn where_in<V: Into<Value>>(
        &self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.push_condition(field, Operator::In, list(values), false)
    }

    pub fn or_where_in<V: Into<Value>>(
        &self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.push_condition(field, Operator::In, list(values), true)
    }

    pub fn where_not_in<V: Into<Value>>(
        &self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.push_condition(field, Operator::NotIn, list(values), false)
    }

    pub fn or_where_not_in<V: Into<Value>>(
        &self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.push_condition(field, Operator::NotIn, list(values), true)
    }

    pub fn where_like(&self, field: &str, pattern: impl Into<String>) -> Result<Self> {
        self.push_condition(field, Operator::Like, Value::String(pattern.into()), false)
    }

    pub fn or_where_like(&self, field: &str, pattern: impl Into<String>) -> Result<Self> {
        self.push_condition(field, Operator::Like, Value::String(pattern.into()), true)
    }

    pub fn where_not_like(&self, field: &str, pattern: impl Into<String>) -> Result<Self> {
        self.push_condition(field, Operator::NotLike, Value::String(pattern.into()), false)
    }

    pub fn or_where_not_like(&self, field: &str, pattern: impl Into<String>) -> Result<Self> {
        self.push_condition(field, Operator::NotLike, Value::String(pattern.into()), true)
    }

    pub fn limit(&self, count: u64) -> Result<Self> {
        self.limit_offset(count, 0)
    }

    pub fn limit_offset(&self, count: u64, offset: u64) -> Result<Self> {
        self.require_table("limit")?;
        let mut next = self.clone();
        next.limit = Some((count, offset));
        Ok(next)
    }

    /// Page `number` (1-based) of `size` rows
    pub fn page(&self, size: u64, number: u64) -> Result<Self> {
        let offset = (number.max(1) - 1).checked_mul(size).ok_or_else(|| {
            NbError::usage(format!("page {number} of size {size} is out of range"))
        })?;
        self.limit_offset(size, offset)
    }

    /// Project a single field, replacing any previous projection
    pub fn field(&self, name: impl Into<String>) -> Result<Self> {
        self.fields([name.into()])
    }

    pub fn fields<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        self.require_table("field")?;
        let mut next = self.clone();
        next.fields = names.into_iter().map(Into::into).collect();
        Ok(next)
    }

    /// Order by `field`; ordering an already ordered field replaces its
    /// direction and keeps its position
    pub fn order(&self, field: impl Into<String>, direction: Direction) -> Result<Self> {
        self.orders([(field.into(), direction)])
    }

    pub fn orders<S: Into<String>>(
        &self,
        orders: impl IntoIterator<Item = (S, Direction)>,
    ) -> Result<Self> {
        self.require_table("order")?;
        let mut next = self.clone();
        for (field, direction) in orders {
            let field = field.into();
            match next.orders.iter_mut().find(|(f, _)| *f == field) {
                Some(existing) => existing.1 = direction,
                None => next.orders.push((field, direction)),
            }
        }
        Ok(next)
    }

    /// Terminal operations return the generated statement instead of running it
    pub fn fetch_sql(&self, enable: bool) -> Self {
        let mut next = self.clone();
        next.fetch_sql = enable;
        next
    }

    /// Allow `update` to run without any WHERE condition
    pub fn unconditional(&self) -> Self {
        let mut next = self.clone();
        next.unconditional = true;
        next
    }

    fn where_clause(&self, params: &mut Vec<Value>) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }

        let mut clause = String::from(" WHERE ");
        for (index, condition) in self.conditions.iter().enumerate() {
            if index > 0 {
                clause.push_str(if condition.or { " OR " } else { " AND " });
            }

            let column = quote_identifier(&condition.field);
            if condition.operator.is_list() {
                let values = match &condition.value {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                if values.is_empty() {
                    clause.push_str(if condition.operator == Operator::In {
                        "1 = 0"
                    } else {
                        "1 = 1"
                    });
                    continue;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                clause.push_str(&format!(
                    "{column} {} ({placeholders})",
                    condition.operator
                ));
                params.extend(values);
            } else {
                clause.push_str(&format!("{column} {} ?", condition.operator));
                params.push(condition.value.clone());
            }
        }
        clause
    }

    fn select_statement(&self) -> Result<Statement> {
        let table = quote_identifier(self.require_table("select")?);
        let mut params = Vec::new();

        let projection = if self.fields.is_empty() {
            "*".to_string()
        } else {
            self.fields.join(", ")
        };
        let mut sql = format!("SELECT {projection} FROM {table}");
        sql.push_str(&self.where_clause(&mut params));

        if !self.orders.is_empty() {
            let orders: Vec<String> = self
                .orders
                .iter()
                .map(|(field, direction)| {
                    format!("{} {}", quote_identifier(field), direction.as_sql())
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some((count, offset)) = self.limit {
            sql.push_str(&format!(" LIMIT {count}"));
            if offset > 0 {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        Ok(Statement::new(sql, params))
    }

    fn insert_statement(&self, row: &Row) -> Result<Statement> {
        let table = quote_identifier(self.require_table("insert")?);
        if row.is_empty() {
            return Err(NbError::usage("insert called with an empty row"));
        }

        let columns: Vec<String> = row.keys().map(|k| quote_identifier(k)).collect();
        let placeholders = vec!["?"; row.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        Ok(Statement::new(sql, row.values().cloned().collect()))
    }

    fn update_statement(&self, row: &Row) -> Result<Statement> {
        let table = quote_identifier(self.require_table("update")?);
        if row.is_empty() {
            return Err(NbError::usage("update called with an empty row"));
        }
        if self.conditions.is_empty() && !self.unconditional {
            return Err(NbError::usage(format!(
                "update on {table} has no WHERE condition; call unconditional() to update every row"
            )));
        }

        let assignments: Vec<String> = row
            .keys()
            .map(|k| format!("{} = ?", quote_identifier(k)))
            .collect();
        let mut params: Vec<Value> = row.values().cloned().collect();
        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        sql.push_str(&self.where_clause(&mut params));
        Ok(Statement::new(sql, params))
    }

    fn delete_statement(&self) -> Result<Statement> {
        let table = quote_identifier(self.require_table("delete")?);
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        sql.push_str(&self.where_clause(&mut params));
        Ok(Statement::new(sql, params))
    }

    async fn run_query(&self, statement: &Statement) -> Result<Vec<Row>> {
        bounded(
            self.timeout,
            "query",
            self.backend.execute_query(&statement.sql, &statement.params),
        )
        .await
    }

    async fn run_exec(&self, statement: &Statement) -> Result<u64> {
        bounded(
            self.timeout,
            "exec",
            self.backend.execute_exec(&statement.sql, &statement.params),
        )
        .await
    }

    pub async fn select(&self) -> Result<Outcome<Vec<Row>>> {
        let statement = self.select_statement()?;
        if self.fetch_sql {
            return Ok(Outcome::Sql(statement));
        }
        Ok(Outcome::Done(self.run_query(&statement).await?))
    }

    /// Returns the number of inserted rows
    pub async fn insert(&self, row: &Row) -> Result<Outcome<u64>> {
        let statement = self.insert_statement(row)?;
        if self.fetch_sql {
            return Ok(Outcome::Sql(statement));
        }
        Ok(Outcome::Done(self.run_exec(&statement).await?))
    }

    /// Returns the number of affected rows
    pub async fn update(&self, row: &Row) -> Result<Outcome<u64>> {
        let statement = self.update_statement(row)?;
        if self.fetch_sql {
            return Ok(Outcome::Sql(statement));
        }
        Ok(Outcome::Done(self.run_exec(&statement).await?))
    }

    pub async fn delete(&self) -> Result<Outcome<u64>> {
        let statement = self.delete_statement()?;
        if self.fetch_sql {
            return Ok(Outcome::Sql(statement));
        }
        Ok(Outcome::Done(self.run_exec(&statement).await?))
    }

    /// Update the rows matching the WHERE clause, or insert `row` when none
    /// match. The probe always runs, even in fetch-SQL mode.
    pub async fn save(&self, row: &Row) -> Result<Outcome<u64>> {
        self.require_table("save")?;
        if self.conditions.is_empty() {
            return Err(NbError::usage("save requires at least one WHERE condition"));
        }

        let probe = self.fetch_sql(false).field("1")?.limit(1)?;
        let exists = !probe.run_query(&probe.select_statement()?).await?.is_empty();

        if exists {
            self.update(row).await
        } else {
            self.insert(row).await
        }
    }

    pub async fn exist(&self) -> Result<Outcome<bool>> {
        let outcome = self.field("1")?.limit(1)?.select().await?;
        Ok(outcome.map(|rows| !rows.is_empty()))
    }

    /// Run arbitrary parameterized SQL that returns rows
    pub async fn raw_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        bounded(self.timeout, "query", self.backend.execute_query(sql, params)).await
    }

    /// Run arbitrary parameterized SQL, returning the affected row count
    pub async fn raw_exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        bounded(self.timeout, "exec", self.backend.execute_exec(sql, params)).await
    }
}

fn parse_operator(text: &str) -> Result<Operator> {
    Operator::parse(text).ok_or_else(|| NbError::usage(format!("unknown operator {text:?}")))
}

fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Value {
    Value::Array(values.into_iter().map(Into::into).collect())
}
