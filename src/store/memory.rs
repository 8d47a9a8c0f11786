//! In-process store with the same owner policy the remote one enforces.
//!
//! Child tables reject writes unless the policy has been relaxed, deleting a
//! product cascades to its children, and every call is journaled. Calls can be
//! made to fail once with [`InMemoryStore::fail_next`].

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Filter, Procedure, RemoteStore, Row, StoreError, Table};

/// A store call as seen by the journal and fault injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreCall {
    Insert(Table),
    Update(Table),
    Delete(Table),
    BulkInsert(Table),
    Procedure(Procedure),
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Row>>,
    policy_relaxed: bool,
    faults: Vec<StoreCall>,
    journal: Vec<StoreCall>,
}

impl MemoryState {
    fn enter(&mut self, call: StoreCall) -> Result<(), StoreError> {
        self.journal.push(call);
        if let Some(pos) = self.faults.iter().position(|f| *f == call) {
            self.faults.remove(pos);
            return Err(StoreError::Unavailable(format!("injected failure on {call:?}")));
        }
        Ok(())
    }

    fn authorize(&self, table: Table) -> Result<(), StoreError> {
        if table.is_owner_scoped() && !self.policy_relaxed {
            return Err(StoreError::PermissionDenied(table.as_str().to_string()));
        }
        Ok(())
    }

    fn table(&mut self, table: Table) -> &mut Vec<Row> {
        self.tables.entry(table).or_default()
    }

    fn append(&mut self, table: Table, rows: Vec<Row>) {
        let now = now();
        let stored = rows.into_iter().map(|mut row| {
            row.insert("id".into(), Value::String(Uuid::now_v7().to_string()));
            row.entry("created_at").or_insert_with(|| now.clone());
            row
        });
        self.table(table).extend(stored);
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next matching call fail.
    pub async fn fail_next(&self, call: StoreCall) {
        self.state.lock().await.faults.push(call);
    }

    pub async fn journal(&self) -> Vec<StoreCall> {
        self.state.lock().await.journal.clone()
    }

    pub async fn clear_journal(&self) {
        self.state.lock().await.journal.clear();
    }

    pub async fn is_policy_relaxed(&self) -> bool {
        self.state.lock().await.policy_relaxed
    }

    pub async fn rows(&self, table: Table) -> Vec<Row> {
        self.state.lock().await.tables.get(&table).cloned().unwrap_or_default()
    }

    pub async fn rows_for(&self, table: Table, product_id: Uuid) -> Vec<Row> {
        let filter = Filter::uuid("product_id", product_id);
        self.rows(table).await.into_iter().filter(|row| filter.matches(row)).collect()
    }

    pub async fn row(&self, table: Table, id: Uuid) -> Option<Row> {
        let filter = Filter::uuid("id", id);
        self.rows(table).await.into_iter().find(|row| filter.matches(row))
    }
}

impl RemoteStore for InMemoryStore {
    async fn insert_row(&self, table: Table, mut fields: Row) -> Result<Row, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::Insert(table))?;
        state.authorize(table)?;
        if !matches!(fields.get("id"), Some(Value::String(_))) {
            fields.insert("id".into(), Value::String(Uuid::now_v7().to_string()));
        }
        let now = now();
        fields.insert("created_at".into(), now.clone());
        fields.insert("updated_at".into(), now);
        state.table(table).push(fields.clone());
        Ok(fields)
    }

    async fn update_row(&self, table: Table, id: Uuid, fields: Row) -> Result<Row, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::Update(table))?;
        state.authorize(table)?;
        let filter = Filter::uuid("id", id);
        let row = state
            .table(table)
            .iter_mut()
            .find(|row| filter.matches(row))
            .ok_or(StoreError::NotFound { table: table.as_str(), id })?;
        for (column, value) in fields {
            if column != "id" {
                row.insert(column, value);
            }
        }
        row.insert("updated_at".into(), now());
        Ok(row.clone())
    }

    async fn delete_rows(&self, table: Table, filter: Filter) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::Delete(table))?;
        state.authorize(table)?;
        let (removed, kept): (Vec<Row>, Vec<Row>) =
            state.table(table).drain(..).partition(|row| filter.matches(row));
        *state.table(table) = kept;

        // products are referenced with ON DELETE CASCADE
        if table == Table::Products {
            let ids: Vec<&Value> = removed.iter().filter_map(|row| row.get("id")).collect();
            for child in [Table::ProductSizes, Table::ProductRecipeLines, Table::ProductConsumableLines] {
                state
                    .table(child)
                    .retain(|row| row.get("product_id").map_or(true, |p| !ids.contains(&p)));
            }
        }
        Ok(removed.len() as u64)
    }

    async fn bulk_insert(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::BulkInsert(table))?;
        state.authorize(table)?;
        state.append(table, rows);
        Ok(())
    }

    async fn invoke_procedure(&self, procedure: Procedure, args: Value) -> Result<Value, StoreError> {
        let mut state = self.state.lock().await;
        state.enter(StoreCall::Procedure(procedure))?;
        let table = match procedure {
            Procedure::RelaxOwnerPolicy => {
                state.policy_relaxed = true;
                return Ok(Value::Null);
            }
            Procedure::RestoreOwnerPolicy => {
                state.policy_relaxed = false;
                return Ok(Value::Null);
            }
            Procedure::InsertRecipeLines => Table::ProductRecipeLines,
            Procedure::InsertConsumableLines => Table::ProductConsumableLines,
        };
        state.authorize(table)?;
        let rows = match args.get("rows") {
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| match row {
                    Value::Object(row) => Ok(row.clone()),
                    other => Err(StoreError::Unavailable(format!("{procedure}: bad row {other}"))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(StoreError::Unavailable(format!("{procedure}: missing rows"))),
        };
        let inserted = rows.len();
        state.append(table, rows);
        Ok(Value::from(inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::to_row;
    use serde_json::json;

    fn size_row(product_id: Uuid, label: &str) -> Row {
        to_row(&json!({ "product_id": product_id.to_string(), "label": label, "price_delta": "0" })).unwrap()
    }

    #[tokio::test]
    async fn test_child_writes_need_relaxed_policy() {
        let store = InMemoryStore::new();
        let id = Uuid::now_v7();
        let err = store.bulk_insert(Table::ProductSizes, vec![size_row(id, "Small")]).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        store.invoke_procedure(Procedure::RelaxOwnerPolicy, json!({})).await.unwrap();
        store.bulk_insert(Table::ProductSizes, vec![size_row(id, "Small")]).await.unwrap();
        assert_eq!(store.rows_for(Table::ProductSizes, id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_product_delete_cascades() {
        let store = InMemoryStore::new();
        let product = store.insert_row(Table::Products, to_row(&json!({ "name": "Tea" })).unwrap()).await.unwrap();
        let id: Uuid = product["id"].as_str().unwrap().parse().unwrap();
        store.invoke_procedure(Procedure::RelaxOwnerPolicy, json!({})).await.unwrap();
        store.bulk_insert(Table::ProductSizes, vec![size_row(id, "Small"), size_row(id, "Large")]).await.unwrap();

        let removed = store.delete_rows(Table::Products, Filter::uuid("id", id)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.rows(Table::ProductSizes).await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = InMemoryStore::new();
        store.fail_next(StoreCall::Insert(Table::Products)).await;
        let fields = to_row(&json!({ "name": "Tea" })).unwrap();
        assert!(store.insert_row(Table::Products, fields.clone()).await.is_err());
        assert!(store.insert_row(Table::Products, fields).await.is_ok());
        assert_eq!(store.journal().await, vec![StoreCall::Insert(Table::Products); 2]);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let store = InMemoryStore::new();
        let id = Uuid::now_v7();
        let err = store.update_row(Table::Products, id, Row::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id: missing, .. } if missing == id));
    }
}
