use std::sync::Arc;

use opensase_catalog::domain::events::NotifyError;
use opensase_catalog::store::memory::{InMemoryStore, StoreCall};
use opensase_catalog::store::{Procedure, Row, StoreError, Table};
use opensase_catalog::{
    AggregateError, AuthorizationGate, CatalogEvent, ChangeNotifier, ChildCollection, ChildSynchronizer,
    ProductInput, ProductWriter, RootAction, SyncPhase, WriteStep,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Default)]
struct RecordingNotifier {
    events: Arc<Mutex<Vec<CatalogEvent>>>,
}

impl ChangeNotifier for RecordingNotifier {
    async fn notify(&self, event: &CatalogEvent) -> Result<(), NotifyError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

fn setup() -> (InMemoryStore, RecordingNotifier, ProductWriter<InMemoryStore, RecordingNotifier>) {
    let store = InMemoryStore::new();
    let notifier = RecordingNotifier::default();
    let writer = ProductWriter::new(store.clone(), notifier.clone());
    (store, notifier, writer)
}

fn input(value: Value) -> ProductInput {
    serde_json::from_value(value).expect("valid input json")
}

fn iced_latte() -> Value {
    json!({
        "name": "Iced Latte",
        "has_sizes": true,
        "sizes": [{ "label": "Small", "delta": 0 }, { "label": "Large", "delta": 1.50 }],
        "has_recipe": false
    })
}

fn recipe_lines(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "ingredient_id": Uuid::now_v7().to_string(), "quantity": i + 1, "cost": 0.25 }))
        .collect()
}

fn size_pairs(rows: &[Row]) -> Vec<(Value, Value)> {
    let mut pairs: Vec<_> = rows.iter().map(|r| (r["label"].clone(), r["price_delta"].clone())).collect();
    pairs.sort_by_key(|(label, _)| label.to_string());
    pairs
}

#[tokio::test]
async fn test_iced_latte_create() {
    let (store, notifier, writer) = setup();

    let product = writer.create(input(iced_latte())).await.expect("create");

    assert_eq!(product.name, "Iced Latte");
    assert!(product.has_sizes);
    assert!(!product.has_recipe);
    assert_eq!(product.unit_price, Decimal::ZERO);
    assert_eq!(product.selling_price, Decimal::ZERO);
    assert_eq!(store.rows_for(Table::ProductSizes, product.id).await.len(), 2);
    assert!(store.rows_for(Table::ProductRecipeLines, product.id).await.is_empty());
    assert!(!store.is_policy_relaxed().await);
    assert_eq!(
        *notifier.events.lock().await,
        vec![CatalogEvent::ProductCreated { product_id: product.id }]
    );
}

#[tokio::test]
async fn test_update_with_sizes_off_clears_sizes() {
    let (store, _, writer) = setup();
    let product = writer.create(input(iced_latte())).await.expect("create");

    let mut body = iced_latte();
    body["has_sizes"] = json!(false);
    let updated = writer.update(product.id, input(body)).await.expect("update");

    assert!(!updated.has_sizes);
    assert!(store.rows_for(Table::ProductSizes, product.id).await.is_empty());
    assert!(!store.is_policy_relaxed().await);
}

#[tokio::test]
async fn test_recipe_flag_off_clears_even_with_lines_supplied() {
    let (store, _, writer) = setup();
    let product = writer
        .create(input(json!({ "name": "Mocha", "has_recipe": true, "recipe": recipe_lines(3) })))
        .await
        .expect("create");
    assert_eq!(store.rows_for(Table::ProductRecipeLines, product.id).await.len(), 3);

    writer
        .update(product.id, input(json!({ "name": "Mocha", "has_recipe": false, "recipe": recipe_lines(3) })))
        .await
        .expect("update");
    assert!(store.rows_for(Table::ProductRecipeLines, product.id).await.is_empty());

    writer
        .update(product.id, input(json!({ "name": "Mocha", "has_recipe": false })))
        .await
        .expect("update without lines");
    assert!(store.rows_for(Table::ProductRecipeLines, product.id).await.is_empty());
}

#[tokio::test]
async fn test_repeated_update_is_idempotent() {
    let (store, _, writer) = setup();
    let product = writer.create(input(json!({ "name": "Tea" }))).await.expect("create");
    let body = json!({
        "name": "Tea",
        "has_sizes": true,
        "sizes": [{ "label": "Cup", "delta": 0 }, { "label": "Pot", "delta": 2.25 }],
        "has_consumables": true,
        "consumables": [{ "consumable_id": Uuid::now_v7().to_string(), "quantity": 1, "cost": 0.05 }]
    });

    writer.update(product.id, input(body.clone())).await.expect("first update");
    let sizes_first = size_pairs(&store.rows_for(Table::ProductSizes, product.id).await);
    let consumables_first = store.rows_for(Table::ProductConsumableLines, product.id).await.len();

    writer.update(product.id, input(body)).await.expect("second update");
    let sizes_second = size_pairs(&store.rows_for(Table::ProductSizes, product.id).await);
    let consumables_second = store.rows_for(Table::ProductConsumableLines, product.id).await.len();

    assert_eq!(sizes_first.len(), 2);
    assert_eq!(sizes_first, sizes_second);
    assert_eq!(consumables_first, 1);
    assert_eq!(consumables_second, 1);
}

#[tokio::test]
async fn test_no_selection_is_stored_as_null() {
    let (store, _, writer) = setup();
    let product = writer
        .create(input(json!({ "name": "Scone", "category_id": "none", "brand_id": "", "unit_id": "None" })))
        .await
        .expect("create");

    assert_eq!(product.category_id, None);
    let row = store.row(Table::Products, product.id).await.expect("stored row");
    assert_eq!(row["category_id"], Value::Null);
    assert_eq!(row["brand_id"], Value::Null);
    assert_eq!(row["unit_id"], Value::Null);
}

#[tokio::test]
async fn test_update_can_clear_a_reference() {
    let (store, _, writer) = setup();
    let category = Uuid::now_v7();
    let product = writer
        .create(input(json!({ "name": "Scone", "category_id": category.to_string() })))
        .await
        .expect("create");
    assert_eq!(product.category_id, Some(category));

    let updated = writer
        .update(product.id, input(json!({ "name": "Scone", "category_id": "none" })))
        .await
        .expect("update");
    assert_eq!(updated.category_id, None);
    assert_eq!(store.row(Table::Products, product.id).await.expect("row")["category_id"], Value::Null);
}

#[tokio::test]
async fn test_size_failure_on_create_leaves_root() {
    let (store, notifier, writer) = setup();
    store.fail_next(StoreCall::BulkInsert(Table::ProductSizes)).await;
    let mut body = iced_latte();
    body["has_recipe"] = json!(true);
    body["recipe"] = json!(recipe_lines(1));

    let err = writer.create(input(body)).await.unwrap_err();

    assert!(err.is_partial());
    assert_eq!(err.step(), WriteStep::SyncChildren);
    assert_eq!(err.collection(), Some(ChildCollection::Sizes));
    match &err {
        AggregateError::ChildSync { source, .. } => assert_eq!(source.phase, SyncPhase::Insert),
        other => panic!("unexpected error: {other}"),
    }
    let product_id = err.product_id().expect("root id");
    assert!(store.row(Table::Products, product_id).await.is_some());
    assert!(store.rows_for(Table::ProductRecipeLines, product_id).await.is_empty());
    assert!(!store.journal().await.contains(&StoreCall::Delete(Table::ProductRecipeLines)));
    assert!(!store.is_policy_relaxed().await);
    assert!(notifier.events.lock().await.is_empty());
}

#[tokio::test]
async fn test_root_insert_failure_stops_everything() {
    let (store, _, writer) = setup();
    store.fail_next(StoreCall::Insert(Table::Products)).await;

    let err = writer.create(input(iced_latte())).await.unwrap_err();

    assert!(matches!(err, AggregateError::RootWrite { action: RootAction::Insert, .. }));
    assert!(!err.is_partial());
    assert_eq!(
        store.journal().await,
        vec![
            StoreCall::Procedure(Procedure::RelaxOwnerPolicy),
            StoreCall::Insert(Table::Products),
            StoreCall::Procedure(Procedure::RestoreOwnerPolicy),
        ]
    );
    assert!(store.rows(Table::Products).await.is_empty());
    assert!(!store.is_policy_relaxed().await);
}

#[tokio::test]
async fn test_gate_failure_aborts_before_writes() {
    let (store, _, writer) = setup();
    store.fail_next(StoreCall::Procedure(Procedure::RelaxOwnerPolicy)).await;

    let err = writer.create(input(iced_latte())).await.unwrap_err();

    assert_eq!(err.step(), WriteStep::OpenGate);
    assert!(store.rows(Table::Products).await.is_empty());
    assert!(!store.journal().await.contains(&StoreCall::Insert(Table::Products)));
}

#[tokio::test]
async fn test_invalid_input_never_reaches_the_store() {
    let (store, _, writer) = setup();

    let err = writer
        .create(input(json!({ "name": "Tea", "category_id": "not-a-category" })))
        .await
        .unwrap_err();

    assert_eq!(err.step(), WriteStep::Validate);
    assert!(store.journal().await.is_empty());
}

#[tokio::test]
async fn test_update_runs_steps_in_order() {
    let (store, _, writer) = setup();
    let product = writer.create(input(json!({ "name": "Tea" }))).await.expect("create");
    store.clear_journal().await;

    writer
        .update(
            product.id,
            input(json!({
                "name": "Tea",
                "has_sizes": true,
                "sizes": [{ "label": "Cup" }],
                "has_recipe": true,
                "recipe": recipe_lines(1)
            })),
        )
        .await
        .expect("update");

    assert_eq!(
        store.journal().await,
        vec![
            StoreCall::Procedure(Procedure::RelaxOwnerPolicy),
            StoreCall::Update(Table::Products),
            StoreCall::Delete(Table::ProductSizes),
            StoreCall::BulkInsert(Table::ProductSizes),
            StoreCall::Delete(Table::ProductRecipeLines),
            StoreCall::Procedure(Procedure::InsertRecipeLines),
            StoreCall::Delete(Table::ProductConsumableLines),
            StoreCall::Procedure(Procedure::RestoreOwnerPolicy),
        ]
    );
}

#[tokio::test]
async fn test_failed_compensation_keeps_original_error() {
    let (store, _, writer) = setup();
    store.fail_next(StoreCall::BulkInsert(Table::ProductSizes)).await;
    store.fail_next(StoreCall::Procedure(Procedure::RestoreOwnerPolicy)).await;

    let err = writer.create(input(iced_latte())).await.unwrap_err();

    assert_eq!(err.collection(), Some(ChildCollection::Sizes));
    match &err {
        AggregateError::ChildSync { source, .. } => {
            assert!(matches!(source.source, StoreError::Unavailable(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    // left relaxed until the next write closes it
    assert!(store.is_policy_relaxed().await);
    writer.create(input(json!({ "name": "Tea" }))).await.expect("next write");
    assert!(!store.is_policy_relaxed().await);
}

#[tokio::test]
async fn test_close_failure_after_success_still_returns_product() {
    let (store, _, writer) = setup();
    store.fail_next(StoreCall::Procedure(Procedure::RestoreOwnerPolicy)).await;

    let product = writer.create(input(iced_latte())).await.expect("create");

    assert!(store.row(Table::Products, product.id).await.is_some());
    assert!(store.is_policy_relaxed().await);
}

#[tokio::test]
async fn test_update_missing_product() {
    let (store, _, writer) = setup();
    let missing = Uuid::now_v7();

    let err = writer.update(missing, input(iced_latte())).await.unwrap_err();

    assert!(matches!(err, AggregateError::NotFound { product_id, action: RootAction::Update } if product_id == missing));
    assert!(!store.journal().await.contains(&StoreCall::Delete(Table::ProductSizes)));
    assert!(!store.is_policy_relaxed().await);
}

#[tokio::test]
async fn test_delete_cascades_to_children() {
    let (store, notifier, writer) = setup();
    let product = writer.create(input(iced_latte())).await.expect("create");

    assert_eq!(writer.delete(product.id).await.expect("delete"), product.id);
    assert!(store.row(Table::Products, product.id).await.is_none());
    assert!(store.rows_for(Table::ProductSizes, product.id).await.is_empty());
    assert_eq!(
        notifier.events.lock().await.last(),
        Some(&CatalogEvent::ProductDeleted { product_id: product.id })
    );

    let err = writer.delete(product.id).await.unwrap_err();
    assert!(matches!(err, AggregateError::NotFound { action: RootAction::Delete, .. }));
}

#[tokio::test]
async fn test_concurrent_writes_do_not_interleave_the_gate() {
    let (store, _, writer) = setup();
    let product = writer.create(input(iced_latte())).await.expect("create");
    store.clear_journal().await;

    let mut small = iced_latte();
    small["sizes"] = json!([{ "label": "Small" }]);
    let (a, b) = tokio::join!(
        writer.update(product.id, input(iced_latte())),
        writer.update(product.id, input(small)),
    );
    a.expect("first update");
    b.expect("second update");

    let mut open = false;
    for call in store.journal().await {
        match call {
            StoreCall::Procedure(Procedure::RelaxOwnerPolicy) => {
                assert!(!open, "gate opened twice without a close in between");
                open = true;
            }
            StoreCall::Procedure(Procedure::RestoreOwnerPolicy) => open = false,
            other => assert!(open || !other_is_child_write(other), "{other:?} ran with the gate closed"),
        }
    }
    assert!(!store.is_policy_relaxed().await);
    assert_eq!(store.rows_for(Table::ProductSizes, product.id).await.len(), 1);
}

fn other_is_child_write(call: StoreCall) -> bool {
    match call {
        StoreCall::Insert(t) | StoreCall::Update(t) | StoreCall::Delete(t) | StoreCall::BulkInsert(t) => {
            t.is_owner_scoped()
        }
        StoreCall::Procedure(p) => matches!(p, Procedure::InsertRecipeLines | Procedure::InsertConsumableLines),
    }
}

#[tokio::test]
async fn test_separate_gates_on_one_session_still_race() {
    // Serialization only covers writes through the same gate. Two gates on one
    // session can still close each other's window.
    let store = InMemoryStore::new();
    let first = AuthorizationGate::new(store.clone());
    let second = AuthorizationGate::new(store.clone());
    let sync = ChildSynchronizer::new(store.clone());

    let lease_a = first.open().await.expect("open a");
    let lease_b = second.open().await.expect("open b");
    lease_a.close().await.expect("close a");

    let rows = opensase_catalog::domain::aggregates::ChildRows::empty(ChildCollection::Sizes);
    let err = sync.replace(Uuid::now_v7(), &rows).await.unwrap_err();
    assert!(matches!(err.source, StoreError::PermissionDenied(_)));
    lease_b.close().await.expect("close b");
}
