//! NATS-backed change notifications.

use crate::domain::events::{CatalogEvent, ChangeNotifier, NotifyError};

/// Publishes [`CatalogEvent`]s to `<prefix>.products.<action>`.
///
/// Without a client the notifier is a no-op, which is what a deployment
/// without NATS gets.
#[derive(Clone, Debug)]
pub struct NatsNotifier {
    client: Option<async_nats::Client>,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client: Some(client), prefix: prefix.into() }
    }

    pub fn disabled() -> Self {
        Self { client: None, prefix: String::new() }
    }

    pub fn subject(&self, event: &CatalogEvent) -> String {
        format!("{}.products.{}", self.prefix, event.action())
    }
}

impl ChangeNotifier for NatsNotifier {
    async fn notify(&self, event: &CatalogEvent) -> Result<(), NotifyError> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let payload = serde_json::to_vec(event)?;
        client
            .publish(self.subject(event), payload.into())
            .await
            .map_err(|e| NotifyError::Publish(e.to_string()))?;
        tracing::debug!(product_id = %event.product_id(), action = event.action(), "published catalog event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_subject() {
        let notifier = NatsNotifier { client: None, prefix: "catalog".into() };
        let event = CatalogEvent::ProductDeleted { product_id: Uuid::now_v7() };
        assert_eq!(notifier.subject(&event), "catalog.products.deleted");
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let event = CatalogEvent::ProductCreated { product_id: Uuid::now_v7() };
        assert!(NatsNotifier::disabled().notify(&event).await.is_ok());
    }
}
