//! Domain events
//!
//! List and detail views refetch when they hear about a product change. The
//! writer emits one event per successful operation.

use serde::Serialize;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEvent {
    ProductCreated { product_id: Uuid },
    ProductUpdated { product_id: Uuid },
    ProductDeleted { product_id: Uuid },
}

impl CatalogEvent {
    pub fn product_id(&self) -> Uuid {
        match self {
            Self::ProductCreated { product_id }
            | Self::ProductUpdated { product_id }
            | Self::ProductDeleted { product_id } => *product_id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::ProductCreated { .. } => "created",
            Self::ProductUpdated { .. } => "updated",
            Self::ProductDeleted { .. } => "deleted",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not publish event: {0}")]
    Publish(String),
}

/// Tells readers that a product changed.
pub trait ChangeNotifier: Clone + Send + Sync + 'static {
    fn notify(&self, event: &CatalogEvent) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

#[derive(Clone, Debug, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    async fn notify(&self, _event: &CatalogEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json() {
        let id = Uuid::now_v7();
        let event = CatalogEvent::ProductUpdated { product_id: id };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "product_updated");
        assert_eq!(json["product_id"], id.to_string());
        assert_eq!(event.action(), "updated");
        assert_eq!(event.product_id(), id);
    }
}
