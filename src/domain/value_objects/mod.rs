//! Value Objects for the product catalog

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Placeholder a select box posts when nothing is chosen.
pub const NO_SELECTION: &str = "none";

/// Returns true when a submitted reference means "no selection".
pub fn is_no_selection(raw: &str) -> bool {
    let raw = raw.trim();
    raw.is_empty() || raw.eq_ignore_ascii_case(NO_SELECTION)
}

/// Normalizes an optional foreign key coming from a form.
///
/// Missing values and every "no selection" placeholder become `None`; anything
/// else has to be a real identifier.
pub fn optional_ref(field: &str, raw: Option<&str>) -> Result<Option<Uuid>, RefError> {
    match raw {
        None => Ok(None),
        Some(raw) if is_no_selection(raw) => Ok(None),
        Some(raw) => parse_ref(field, raw).map(Some),
    }
}

/// Normalizes a foreign key that must point somewhere.
pub fn required_ref(field: &str, raw: &str) -> Result<Uuid, RefError> {
    if is_no_selection(raw) {
        return Err(RefError::Missing { field: field.to_string() });
    }
    parse_ref(field, raw)
}

fn parse_ref(field: &str, raw: &str) -> Result<Uuid, RefError> {
    Uuid::parse_str(raw.trim()).map_err(|_| RefError::Malformed {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

/// Trims free text and drops it when nothing is left.
pub fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    #[error("{field} is required")]
    Missing { field: String },
    #[error("{field} is not a valid identifier: `{value}`")]
    Malformed { field: String, value: String },
}

/// Validator hook: prices and costs never go below zero.
pub fn non_negative(value: &Decimal) -> Result<(), validator::ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(validator::ValidationError::new("negative_amount"));
    }
    Ok(())
}

pub fn non_negative_count(value: i64) -> Result<(), validator::ValidationError> {
    if value < 0 {
        return Err(validator::ValidationError::new("negative_count"));
    }
    Ok(())
}

/// Validator hook: recipe and consumable quantities.
pub fn positive(value: &Decimal) -> Result<(), validator::ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(validator::ValidationError::new("non_positive_quantity"));
    }
    Ok(())
}
