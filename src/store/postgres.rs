//! Postgres adapter. Rows travel as JSON and are shaped into the table's row
//! type with `jsonb_populate_record`, so one statement template serves every
//! table.

use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use super::{Filter, Procedure, RemoteStore, Row, StoreError, Table};

/// SQLSTATE raised when a row-level security policy rejects a write.
const INSUFFICIENT_PRIVILEGE: &str = "42501";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn columns<'a>(row: &'a Row) -> Result<Vec<&'a str>, StoreError> {
    if row.is_empty() {
        return Err(StoreError::EmptyRow);
    }
    row.keys()
        .map(|key| {
            if is_identifier(key) {
                Ok(key.as_str())
            } else {
                Err(StoreError::InvalidColumn(key.clone()))
            }
        })
        .collect()
}

fn insert_sql(table: Table, columns: &[&str]) -> String {
    let list = columns.join(", ");
    format!(
        "INSERT INTO {t} ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{t}, $1) RETURNING to_jsonb({t}.*)",
        t = table.as_str()
    )
}

fn update_sql(table: Table, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .filter(|c| **c != "id")
        .map(|c| format!("{c} = r.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {t} AS t SET {assignments} FROM jsonb_populate_record(NULL::{t}, $2) AS r WHERE t.id = $1 RETURNING to_jsonb(t.*)",
        t = table.as_str()
    )
}

fn delete_sql(table: Table, column: &str) -> String {
    format!(
        "DELETE FROM {t} WHERE {column} = (SELECT {column} FROM jsonb_populate_record(NULL::{t}, $1))",
        t = table.as_str()
    )
}

fn bulk_insert_sql(table: Table, columns: &[&str]) -> String {
    let list = columns.join(", ");
    format!(
        "INSERT INTO {t} ({list}) SELECT {list} FROM jsonb_populate_recordset(NULL::{t}, $1)",
        t = table.as_str()
    )
}

fn classify(err: sqlx::Error, target: &str) -> StoreError {
    let denied = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == INSUFFICIENT_PRIVILEGE);
    if denied {
        StoreError::PermissionDenied(target.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn into_row(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Decode(serde::de::Error::custom(format!(
            "expected a row object, got {other}"
        )))),
    }
}

impl RemoteStore for PgStore {
    async fn insert_row(&self, table: Table, fields: Row) -> Result<Row, StoreError> {
        let sql = insert_sql(table, &columns(&fields)?);
        let row: Value = sqlx::query_scalar(&sql)
            .bind(Json(Value::Object(fields)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, table.as_str()))?;
        into_row(row)
    }

    async fn update_row(&self, table: Table, id: Uuid, fields: Row) -> Result<Row, StoreError> {
        let sql = update_sql(table, &columns(&fields)?);
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(Json(Value::Object(fields)))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, table.as_str()))?;
        into_row(row.ok_or(StoreError::NotFound { table: table.as_str(), id })?)
    }

    async fn delete_rows(&self, table: Table, filter: Filter) -> Result<u64, StoreError> {
        let sql = delete_sql(table, filter.column);
        let mut probe = Row::new();
        probe.insert(filter.column.to_string(), filter.value);
        let done = sqlx::query(&sql)
            .bind(Json(Value::Object(probe)))
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, table.as_str()))?;
        Ok(done.rows_affected())
    }

    async fn bulk_insert(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let sql = bulk_insert_sql(table, &columns(first)?);
        let rows: Vec<Value> = rows.into_iter().map(Value::Object).collect();
        sqlx::query(&sql)
            .bind(Json(Value::Array(rows)))
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, table.as_str()))?;
        Ok(())
    }

    async fn invoke_procedure(&self, procedure: Procedure, args: Value) -> Result<Value, StoreError> {
        let sql = format!("SELECT {}($1)", procedure.as_str());
        let result: Option<Value> = sqlx::query_scalar(&sql)
            .bind(Json(args))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, procedure.as_str()))?;
        Ok(result.unwrap_or(Value::Null))
    }
}
