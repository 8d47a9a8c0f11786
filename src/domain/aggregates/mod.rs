//! Aggregates module
pub mod product;

pub use product::{
    ChildCollection, ChildRows, ConsumableLine, ConsumableLineInput, Product, ProductDraft,
    ProductFields, ProductInput, RecipeLine, RecipeLineInput, SizeInput, SizeVariant,
};
