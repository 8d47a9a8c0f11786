//! Product aggregate writer.
//!
//! Create and update run as: validate, open the gate, write the root row,
//! replace sizes, recipe and consumables in that order, close the gate. The
//! first failing step ends the write. The gate gets exactly one close attempt
//! either way, and the caller sees the error of the step that failed.
//!
//! There is no cross-table transaction underneath. A failure after the root
//! write leaves the root in place ([`AggregateError::is_partial`]); since
//! every child sync is a full replace, retrying the whole write is safe.

mod gate;
mod sync;

pub use gate::{AuthorizationGate, GateLease};
pub use sync::ChildSynchronizer;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{ChildRows, Product, ProductDraft, ProductInput};
use crate::domain::events::{CatalogEvent, ChangeNotifier};
use crate::store::{Filter, RemoteStore, StoreError, Table};
use crate::{AggregateError, RootAction};

#[derive(Clone, Debug)]
pub struct ProductWriter<S, N> {
    store: S,
    gate: AuthorizationGate<S>,
    children: ChildSynchronizer<S>,
    notifier: N,
}

impl<S: RemoteStore, N: ChangeNotifier> ProductWriter<S, N> {
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            gate: AuthorizationGate::new(store.clone()),
            children: ChildSynchronizer::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Creates a product. Only collections whose flag is set are written.
    #[tracing::instrument(skip_all, fields(name = %input.name))]
    pub async fn create(&self, input: ProductInput) -> Result<Product, AggregateError> {
        let draft = input.normalize()?;
        let lease = self.gate.open().await?;
        let outcome = self.create_steps(&draft).await;
        let product = self.settle(lease, outcome).await?;

        info!(product_id = %product.id, "product created");
        self.publish(CatalogEvent::ProductCreated { product_id: product.id }).await;
        Ok(product)
    }

    /// Updates a product. All three collections are reconciled; a collection
    /// whose flag is off is emptied.
    #[tracing::instrument(skip(self, input), fields(name = %input.name))]
    pub async fn update(&self, id: Uuid, input: ProductInput) -> Result<Product, AggregateError> {
        let draft = input.normalize()?;
        let lease = self.gate.open().await?;
        let outcome = self.update_steps(id, &draft).await;
        let product = self.settle(lease, outcome).await?;

        info!(product_id = %product.id, "product updated");
        self.publish(CatalogEvent::ProductUpdated { product_id: product.id }).await;
        Ok(product)
    }

    /// Deletes a product. Child rows go with it through the store's cascade.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<Uuid, AggregateError> {
        let removed = self
            .store
            .delete_rows(Table::Products, Filter::uuid("id", id))
            .await
            .map_err(|source| AggregateError::RootWrite { action: RootAction::Delete, source })?;
        if removed == 0 {
            return Err(AggregateError::NotFound { product_id: id, action: RootAction::Delete });
        }

        info!(product_id = %id, "product deleted");
        self.publish(CatalogEvent::ProductDeleted { product_id: id }).await;
        Ok(id)
    }

    async fn create_steps(&self, draft: &ProductDraft) -> Result<Product, AggregateError> {
        let root_failed = |source| AggregateError::RootWrite { action: RootAction::Insert, source };
        let fields = draft.fields.to_row().map_err(root_failed)?;
        let row = self.store.insert_row(Table::Products, fields).await.map_err(root_failed)?;
        let product = Product::from_row(row).map_err(root_failed)?;

        self.sync_children(product.id, draft.children_for_create()).await?;
        Ok(product)
    }

    async fn update_steps(&self, id: Uuid, draft: &ProductDraft) -> Result<Product, AggregateError> {
        let root_failed = |source| match source {
            StoreError::NotFound { .. } => AggregateError::NotFound { product_id: id, action: RootAction::Update },
            source => AggregateError::RootWrite { action: RootAction::Update, source },
        };
        let mut fields = draft.fields.to_row().map_err(root_failed)?;
        fields.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        let row = self.store.update_row(Table::Products, id, fields).await.map_err(root_failed)?;
        let product = Product::from_row(row).map_err(root_failed)?;

        self.sync_children(product.id, draft.children_for_update()).await?;
        Ok(product)
    }

    async fn sync_children(&self, product_id: Uuid, plan: Vec<ChildRows>) -> Result<(), AggregateError> {
        for desired in &plan {
            self.children
                .replace(product_id, desired)
                .await
                .map_err(|source| AggregateError::ChildSync { product_id, source })?;
        }
        Ok(())
    }

    /// Closes the gate once, whichever way the steps went.
    async fn settle(
        &self,
        lease: GateLease<S>,
        outcome: Result<Product, AggregateError>,
    ) -> Result<Product, AggregateError> {
        match outcome {
            Ok(product) => {
                if let Err(e) = lease.close().await {
                    warn!(product_id = %product.id, error = %e, "write succeeded but the gate did not close");
                }
                Ok(product)
            }
            Err(err) => {
                warn!(error = %err, step = ?err.step(), "product write failed");
                lease.compensate(&err).await;
                Err(err)
            }
        }
    }

    async fn publish(&self, event: CatalogEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(product_id = %event.product_id(), error = %e, "could not publish catalog event");
        }
    }
}
