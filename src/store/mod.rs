//! Table-scoped access to the remote store.
//!
//! The store only understands single-table writes and a handful of named
//! procedures. Anything spanning tables is coordinated by the writer.

pub mod memory;
pub mod postgres;

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// One row as it travels to and from the store.
pub type Row = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Products,
    ProductSizes,
    ProductRecipeLines,
    ProductConsumableLines,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Products => "products",
            Table::ProductSizes => "product_sizes",
            Table::ProductRecipeLines => "product_recipe_lines",
            Table::ProductConsumableLines => "product_consumable_lines",
        }
    }

    /// Child tables sit behind the owner policy; the root table does not.
    pub fn is_owner_scoped(self) -> bool {
        !matches!(self, Table::Products)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named remote procedures. Each takes a single JSON argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Procedure {
    RelaxOwnerPolicy,
    RestoreOwnerPolicy,
    InsertRecipeLines,
    InsertConsumableLines,
}

impl Procedure {
    pub fn as_str(self) -> &'static str {
        match self {
            Procedure::RelaxOwnerPolicy => "relax_owner_policy",
            Procedure::RestoreOwnerPolicy => "restore_owner_policy",
            Procedure::InsertRecipeLines => "insert_recipe_lines",
            Procedure::InsertConsumableLines => "insert_consumable_lines",
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filter on a single column.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &'static str, value: Value) -> Self {
        Self { column, value }
    }

    pub fn uuid(column: &'static str, id: Uuid) -> Self {
        Self::eq(column, Value::String(id.to_string()))
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(self.column) == Some(&self.value)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("permission denied on {0}")]
    PermissionDenied(String),

    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: Uuid },

    #[error("could not encode row: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("could not decode row: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("row has no columns")]
    EmptyRow,

    #[error("invalid column name `{0}`")]
    InvalidColumn(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The operations the remote store exposes. None of them span tables.
pub trait RemoteStore: Clone + Send + Sync + 'static {
    /// Inserts one row and returns it as stored, identity included.
    fn insert_row(
        &self,
        table: Table,
        fields: Row,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send;

    /// Updates the row with the given identity and returns it as stored.
    fn update_row(
        &self,
        table: Table,
        id: Uuid,
        fields: Row,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send;

    /// Deletes every matching row, returning how many went away.
    fn delete_rows(
        &self,
        table: Table,
        filter: Filter,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn bulk_insert(
        &self,
        table: Table,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn invoke_procedure(
        &self,
        procedure: Procedure,
        args: Value,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send;
}

/// Serializes a struct into a store row.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value).map_err(StoreError::Encode)? {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Encode(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        )))),
    }
}
