//! Order event publishing.
//!
//! Events are published after the write that raised them has committed.
//! Delivery is best effort: a failed publish is logged and never fails the
//! request that caused it.

use async_trait::async_trait;

use crate::domain::events::OrderEvent;

pub const SUBJECT_PREFIX: &str = "storefront.orders";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError>;
}

/// Publishes each event and logs failures.
pub async fn publish_all(publisher: &dyn EventPublisher, events: Vec<OrderEvent>) {
    for event in events {
        if let Err(e) = publisher.publish(&event).await {
            tracing::warn!(order_id = %event.order_id(), kind = event.kind(), error = %e, "failed to publish order event");
        }
    }
}

pub fn subject_for(event: &OrderEvent) -> String { format!("{}.{}", SUBJECT_PREFIX, event.kind()) }

pub struct NatsPublisher { client: async_nats::Client }

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(subject_for(event), payload.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

/// Used when no broker is configured.
#[derive(Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        tracing::debug!(subject = %subject_for(event), order_id = %event.order_id(), "order event");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::RwLock;

    /// Keeps published events in memory.
    #[derive(Default)]
    pub struct RecordingPublisher {
        published: RwLock<Vec<OrderEvent>>,
        fail_on_publish: RwLock<bool>,
    }

    impl RecordingPublisher {
        pub fn new() -> Self { Self::default() }

        pub async fn set_fail_on_publish(&self, fail: bool) { *self.fail_on_publish.write().await = fail; }

        pub async fn take_published(&self) -> Vec<OrderEvent> { std::mem::take(&mut *self.published.write().await) }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
            if *self.fail_on_publish.read().await {
                return Err(PublishError::Transport("publish disabled".into()));
            }
            self.published.write().await.push(event.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingPublisher;
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_subject_uses_kind() {
        let event = OrderEvent::Cancelled { order_id: Uuid::nil(), reason: "x".into() };
        assert_eq!(subject_for(&event), "storefront.orders.cancelled");
    }

    #[tokio::test]
    async fn test_publish_all_swallows_failures() {
        let publisher = RecordingPublisher::new();
        publisher.set_fail_on_publish(true).await;
        publish_all(&publisher, vec![OrderEvent::Cancelled { order_id: Uuid::nil(), reason: "x".into() }]).await;
        assert!(publisher.take_published().await.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let event = OrderEvent::PaymentConfirmed { order_id: Uuid::nil(), intent_id: "pi_1".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "paymentConfirmed");
        assert_eq!(json["intentId"], "pi_1");
    }
}
