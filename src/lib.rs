//! OpenSASE Catalog
//!
//! Product aggregate writer for the point-of-sale console.
//!
//! A product is one root row plus three child collections (size variants,
//! recipe lines, consumable lines), and the store underneath only offers
//! table-level writes. [`ProductWriter`] sequences those writes behind an
//! owner-policy gate and reports exactly which step failed when one does.
//!
//! ## Features
//! - Sentinel-free normalization of form input
//! - Serialized write gate with guaranteed close attempts
//! - Full-replace synchronization of child collections
//! - Classified errors for partial failures
//! - Change notifications over NATS

pub mod config;
pub mod domain;
pub mod http;
pub mod notify;
pub mod store;
pub mod writer;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use domain::aggregates::{ChildCollection, Product, ProductInput};
pub use domain::events::{CatalogEvent, ChangeNotifier, NoopNotifier};
pub use store::{RemoteStore, StoreError};
pub use writer::{AuthorizationGate, ChildSynchronizer, ProductWriter};

use domain::value_objects::RefError;

// =============================================================================
// Error Types
// =============================================================================

/// Rejected input. Raised before any remote call.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0}")]
    Fields(#[from] validator::ValidationErrors),

    #[error("name must not be blank")]
    BlankName,

    #[error("name is {len} characters long, at most {max} allowed")]
    NameTooLong { len: usize, max: usize },

    #[error(transparent)]
    Reference(#[from] RefError),
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("could not relax owner policy: {0}")]
    Open(#[source] StoreError),

    #[error("could not restore owner policy: {0}")]
    Close(#[source] StoreError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Delete,
    Insert,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Insert => write!(f, "insert"),
        }
    }
}

/// One child collection could not be replaced.
#[derive(Error, Debug)]
#[error("{collection} could not be updated ({phase} failed): {source}")]
pub struct SyncError {
    pub collection: ChildCollection,
    pub phase: SyncPhase,
    #[source]
    pub source: StoreError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootAction {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for RootAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Where in an aggregate write a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStep {
    Validate,
    OpenGate,
    InsertRoot,
    UpdateRoot,
    DeleteRoot,
    SyncChildren,
}

impl From<RootAction> for WriteStep {
    fn from(action: RootAction) -> Self {
        match action {
            RootAction::Insert => WriteStep::InsertRoot,
            RootAction::Update => WriteStep::UpdateRoot,
            RootAction::Delete => WriteStep::DeleteRoot,
        }
    }
}

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("invalid product: {0}")]
    Validation(#[from] ValidationError),

    #[error("write gate unavailable: {0}")]
    Gate(#[from] GateError),

    #[error("product {action} failed: {source}")]
    RootWrite {
        action: RootAction,
        #[source]
        source: StoreError,
    },

    #[error("product {product_id} not found")]
    NotFound { product_id: Uuid, action: RootAction },

    #[error("product {product_id} saved, but {source}")]
    ChildSync {
        product_id: Uuid,
        #[source]
        source: SyncError,
    },
}

impl AggregateError {
    pub fn step(&self) -> WriteStep {
        match self {
            Self::Validation(_) => WriteStep::Validate,
            Self::Gate(_) => WriteStep::OpenGate,
            Self::RootWrite { action, .. } | Self::NotFound { action, .. } => (*action).into(),
            Self::ChildSync { .. } => WriteStep::SyncChildren,
        }
    }

    pub fn collection(&self) -> Option<ChildCollection> {
        match self {
            Self::ChildSync { source, .. } => Some(source.collection),
            _ => None,
        }
    }

    pub fn product_id(&self) -> Option<Uuid> {
        match self {
            Self::NotFound { product_id, .. } | Self::ChildSync { product_id, .. } => Some(*product_id),
            _ => None,
        }
    }

    /// The root row was written but the aggregate is incomplete.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::ChildSync { .. })
    }
}

/// The gate could not be closed while unwinding a failed write. Logged, never
/// returned: the caller gets the error that caused the unwind.
#[derive(Error, Debug)]
#[error("write gate left open after {step:?} failure: {source}")]
pub struct CompensationWarning {
    pub step: WriteStep,
    pub product_id: Option<Uuid>,
    #[source]
    pub source: GateError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_sync_classification() {
        let product_id = Uuid::now_v7();
        let err = AggregateError::ChildSync {
            product_id,
            source: SyncError {
                collection: ChildCollection::Recipe,
                phase: SyncPhase::Insert,
                source: StoreError::Unavailable("timeout".into()),
            },
        };
        assert_eq!(err.step(), WriteStep::SyncChildren);
        assert_eq!(err.collection(), Some(ChildCollection::Recipe));
        assert_eq!(err.product_id(), Some(product_id));
        assert!(err.is_partial());
        assert_eq!(
            err.to_string(),
            format!("product {product_id} saved, but recipe could not be updated (insert failed): store unavailable: timeout")
        );
    }

    #[test]
    fn test_root_failure_is_not_partial() {
        let err = AggregateError::RootWrite {
            action: RootAction::Update,
            source: StoreError::Unavailable("down".into()),
        };
        assert_eq!(err.step(), WriteStep::UpdateRoot);
        assert!(!err.is_partial());
        assert_eq!(err.collection(), None);
    }
}
