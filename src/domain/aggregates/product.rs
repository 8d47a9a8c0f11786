//! Product Aggregate
//!
//! A product is stored as one root row plus three child collections. Forms
//! submit a [`ProductInput`]; [`ProductInput::normalize`] turns it into a
//! [`ProductDraft`] that is safe to persist, and the store hands back a
//! [`Product`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::domain::value_objects::{
    non_negative, non_negative_count, optional_ref, optional_text, positive, required_ref,
};
use crate::store::{to_row, Row, StoreError, Table};
use crate::ValidationError;

/// Longest product name accepted, counted after trimming.
pub const MAX_NAME_LEN: usize = 120;

/// Reads `null` as the type's default so returned records never carry nulls.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Caller input
// =============================================================================

/// The desired state of a product as submitted by the console.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct ProductInput {
    pub name: String,
    pub category_id: Option<String>,
    pub brand_id: Option<String>,
    pub warranty_id: Option<String>,
    pub location_id: Option<String>,
    pub unit_id: Option<String>,
    #[validate(custom = "non_negative")]
    pub unit_price: Option<Decimal>,
    #[validate(custom = "non_negative")]
    pub selling_price: Option<Decimal>,
    pub has_sizes: Option<bool>,
    pub has_recipe: Option<bool>,
    pub has_consumables: Option<bool>,
    #[validate(custom = "non_negative_count")]
    pub alert_threshold: Option<i64>,
    #[validate(length(max = 2048))]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    #[validate]
    pub sizes: Vec<SizeInput>,
    #[serde(default, alias = "recipe_lines", deserialize_with = "null_as_default")]
    #[validate]
    pub recipe: Vec<RecipeLineInput>,
    #[serde(default, alias = "consumable_lines", deserialize_with = "null_as_default")]
    #[validate]
    pub consumables: Vec<ConsumableLineInput>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct SizeInput {
    #[validate(length(min = 1, max = 60))]
    pub label: String,
    #[serde(default, alias = "delta")]
    pub price_delta: Decimal,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct RecipeLineInput {
    pub ingredient_id: String,
    #[validate(custom = "positive")]
    pub quantity: Decimal,
    pub unit_id: Option<String>,
    #[serde(default)]
    #[validate(custom = "non_negative")]
    pub cost: Decimal,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct ConsumableLineInput {
    pub consumable_id: String,
    #[validate(custom = "positive")]
    pub quantity: Decimal,
    pub unit_id: Option<String>,
    #[serde(default)]
    #[validate(custom = "non_negative")]
    pub cost: Decimal,
}

impl ProductInput {
    /// Validates the input and resolves every reference and default.
    pub fn normalize(&self) -> Result<ProductDraft, ValidationError> {
        self.validate()?;
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::BlankName);
        }
        let len = name.chars().count();
        if len > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong { len, max: MAX_NAME_LEN });
        }

        let fields = ProductFields {
            name: name.to_string(),
            category_id: optional_ref("category_id", self.category_id.as_deref())?,
            brand_id: optional_ref("brand_id", self.brand_id.as_deref())?,
            warranty_id: optional_ref("warranty_id", self.warranty_id.as_deref())?,
            location_id: optional_ref("location_id", self.location_id.as_deref())?,
            unit_id: optional_ref("unit_id", self.unit_id.as_deref())?,
            unit_price: self.unit_price.unwrap_or_default(),
            selling_price: self.selling_price.unwrap_or_default(),
            has_sizes: self.has_sizes.unwrap_or(false),
            has_recipe: self.has_recipe.unwrap_or(false),
            has_consumables: self.has_consumables.unwrap_or(false),
            alert_threshold: self.alert_threshold.unwrap_or(0),
            image_url: optional_text(self.image_url.as_deref()),
        };

        let sizes = self
            .sizes
            .iter()
            .map(|s| SizeVariant { label: s.label.trim().to_string(), price_delta: s.price_delta })
            .collect();

        let recipe = self
            .recipe
            .iter()
            .enumerate()
            .map(|(i, line)| -> Result<RecipeLine, ValidationError> {
                Ok(RecipeLine {
                    ingredient_id: required_ref(&format!("recipe[{i}].ingredient_id"), &line.ingredient_id)?,
                    quantity: line.quantity,
                    unit_id: optional_ref(&format!("recipe[{i}].unit_id"), line.unit_id.as_deref())?,
                    cost: line.cost,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let consumables = self
            .consumables
            .iter()
            .enumerate()
            .map(|(i, line)| -> Result<ConsumableLine, ValidationError> {
                Ok(ConsumableLine {
                    consumable_id: required_ref(&format!("consumables[{i}].consumable_id"), &line.consumable_id)?,
                    quantity: line.quantity,
                    unit_id: optional_ref(&format!("consumables[{i}].unit_id"), line.unit_id.as_deref())?,
                    cost: line.cost,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProductDraft { fields, sizes, recipe, consumables })
    }
}

// =============================================================================
// Normalized aggregate
// =============================================================================

/// Root columns written on create and update. `None` serializes to `null`,
/// which is how a cleared reference reaches the store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductFields {
    pub name: String,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub warranty_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub selling_price: Decimal,
    pub has_sizes: bool,
    pub has_recipe: bool,
    pub has_consumables: bool,
    pub alert_threshold: i64,
    pub image_url: Option<String>,
}

impl ProductFields {
    pub fn to_row(&self) -> Result<Row, StoreError> {
        to_row(self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProductDraft {
    pub fields: ProductFields,
    pub sizes: Vec<SizeVariant>,
    pub recipe: Vec<RecipeLine>,
    pub consumables: Vec<ConsumableLine>,
}

impl ProductDraft {
    /// Collections written on create: only those whose flag is set.
    pub fn children_for_create(&self) -> Vec<ChildRows> {
        self.children().into_iter().filter(|(enabled, _)| *enabled).map(|(_, rows)| rows).collect()
    }

    /// Collections reconciled on update: all three, emptied when the flag is
    /// off so stale rows get cleared.
    pub fn children_for_update(&self) -> Vec<ChildRows> {
        self.children()
            .into_iter()
            .map(|(enabled, rows)| if enabled { rows } else { ChildRows::empty(rows.collection()) })
            .collect()
    }

    fn children(&self) -> [(bool, ChildRows); 3] {
        [
            (self.fields.has_sizes, ChildRows::Sizes(self.sizes.clone())),
            (self.fields.has_recipe, ChildRows::Recipe(self.recipe.clone())),
            (self.fields.has_consumables, ChildRows::Consumables(self.consumables.clone())),
        ]
    }
}

// =============================================================================
// Child collections
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizeVariant {
    pub label: String,
    pub price_delta: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecipeLine {
    pub ingredient_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsumableLine {
    pub consumable_id: Uuid,
    pub quantity: Decimal,
    pub unit_id: Option<Uuid>,
    pub cost: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildCollection {
    Sizes,
    Recipe,
    Consumables,
}

impl ChildCollection {
    pub fn table(self) -> Table {
        match self {
            ChildCollection::Sizes => Table::ProductSizes,
            ChildCollection::Recipe => Table::ProductRecipeLines,
            ChildCollection::Consumables => Table::ProductConsumableLines,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChildCollection::Sizes => "sizes",
            ChildCollection::Recipe => "recipe",
            ChildCollection::Consumables => "consumables",
        }
    }
}

impl fmt::Display for ChildCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete desired contents of one child collection.
#[derive(Clone, Debug, PartialEq)]
pub enum ChildRows {
    Sizes(Vec<SizeVariant>),
    Recipe(Vec<RecipeLine>),
    Consumables(Vec<ConsumableLine>),
}

#[derive(Serialize)]
struct Owned<'a, T> {
    product_id: Uuid,
    #[serde(flatten)]
    line: &'a T,
}

fn owned_rows<T: Serialize>(product_id: Uuid, lines: &[T]) -> Result<Vec<Row>, StoreError> {
    lines.iter().map(|line| to_row(&Owned { product_id, line })).collect()
}

impl ChildRows {
    pub fn empty(collection: ChildCollection) -> Self {
        match collection {
            ChildCollection::Sizes => ChildRows::Sizes(Vec::new()),
            ChildCollection::Recipe => ChildRows::Recipe(Vec::new()),
            ChildCollection::Consumables => ChildRows::Consumables(Vec::new()),
        }
    }

    pub fn collection(&self) -> ChildCollection {
        match self {
            ChildRows::Sizes(_) => ChildCollection::Sizes,
            ChildRows::Recipe(_) => ChildCollection::Recipe,
            ChildRows::Consumables(_) => ChildCollection::Consumables,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChildRows::Sizes(rows) => rows.len(),
            ChildRows::Recipe(rows) => rows.len(),
            ChildRows::Consumables(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store rows, each tagged with its owning product.
    pub fn to_rows(&self, product_id: Uuid) -> Result<Vec<Row>, StoreError> {
        match self {
            ChildRows::Sizes(rows) => owned_rows(product_id, rows),
            ChildRows::Recipe(rows) => owned_rows(product_id, rows),
            ChildRows::Consumables(rows) => owned_rows(product_id, rows),
        }
    }
}

// =============================================================================
// Stored record
// =============================================================================

/// The root record as stored. Numerics and flags are never null here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub brand_id: Option<Uuid>,
    #[serde(default)]
    pub warranty_id: Option<Uuid>,
    #[serde(default)]
    pub location_id: Option<Uuid>,
    #[serde(default)]
    pub unit_id: Option<Uuid>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unit_price: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub selling_price: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_sizes: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_recipe: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_consumables: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alert_threshold: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn from_row(row: Row) -> Result<Self, StoreError> {
        serde_json::from_value(serde_json::Value::Object(row)).map_err(StoreError::Decode)
    }
}
