//! Full-replace synchronization of one child collection.

use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::{ChildCollection, ChildRows};
use crate::store::{Filter, Procedure, RemoteStore, StoreError};
use crate::{SyncError, SyncPhase};

#[derive(Clone, Debug)]
pub struct ChildSynchronizer<S> {
    store: S,
}

impl<S: RemoteStore> ChildSynchronizer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Replaces everything stored for `product_id` in the collection with
    /// `desired`. Needs the gate open.
    ///
    /// Stored rows are deleted first; if that fails nothing is inserted. If
    /// the insert fails the collection is left empty.
    #[tracing::instrument(skip(self, desired), fields(collection = %desired.collection(), rows = desired.len()))]
    pub async fn replace(&self, product_id: Uuid, desired: &ChildRows) -> Result<(), SyncError> {
        let collection = desired.collection();
        let fail = |phase| move |source| SyncError { collection, phase, source };

        let removed = self
            .store
            .delete_rows(collection.table(), Filter::uuid("product_id", product_id))
            .await
            .map_err(fail(SyncPhase::Delete))?;
        debug!(removed, "cleared stored rows");

        if desired.is_empty() {
            return Ok(());
        }
        let rows = desired.to_rows(product_id).map_err(fail(SyncPhase::Insert))?;
        let inserted = rows.len();
        self.insert(collection, rows).await.map_err(fail(SyncPhase::Insert))?;
        debug!(inserted, "inserted desired rows");
        Ok(())
    }

    async fn insert(&self, collection: ChildCollection, rows: Vec<crate::store::Row>) -> Result<(), StoreError> {
        // recipe and consumable rows are owned by the stock principal and
        // can only be written through its procedures
        let procedure = match collection {
            ChildCollection::Sizes => return self.store.bulk_insert(collection.table(), rows).await,
            ChildCollection::Recipe => Procedure::InsertRecipeLines,
            ChildCollection::Consumables => Procedure::InsertConsumableLines,
        };
        self.store.invoke_procedure(procedure, json!({ "rows": rows })).await.map(drop)
    }
}
