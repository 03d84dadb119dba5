//! Payment Intent Bridge
//!
//! Requests a chargeable handle from the card processor for an order. No local
//! state changes here: the order's payment status moves only when the
//! processor's webhook arrives.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::domain::value_objects::Money;
use crate::{Result, StoreError};

pub mod signature;
pub mod stripe;

pub use stripe::StripeClient;

pub const ORDER_ID_METADATA: &str = "order_id";
pub const USER_ID_METADATA: &str = "user_id";

/// What the processor is asked to charge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: Vec<(String, String)>,
    /// Repeated requests with the same key get the same intent back.
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentHandle { pub client_secret: String, pub payment_intent_id: String }

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<IntentHandle>;
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: Option<String>,
}

pub struct PaymentBridge {
    processor: Arc<dyn PaymentProcessor>,
    timeout: Duration,
}

impl PaymentBridge {
    pub fn new(processor: Arc<dyn PaymentProcessor>, timeout: Duration) -> Self { Self { processor, timeout } }

    /// Asks the processor for an intent tagged with the order and user ids.
    /// Calls for the same payment attempt of an order share one intent.
    #[instrument(skip(self, order, amount), fields(order_id = %order.id(), amount = %amount))]
    pub async fn create_intent(&self, order: &Order, user_id: &str, amount: &Money) -> Result<IntentHandle> {
        if !amount.is_positive() { return Err(StoreError::InvalidAmount); }
        let amount_minor = amount.to_minor_units()?;
        if amount_minor <= 0 { return Err(StoreError::InvalidAmount); }

        let request = IntentRequest {
            amount_minor,
            currency: amount.currency().to_string(),
            metadata: vec![
                (ORDER_ID_METADATA.to_string(), order.id().to_string()),
                (USER_ID_METADATA.to_string(), user_id.to_string()),
            ],
            idempotency_key: attempt_key(order),
        };
        let handle = tokio::time::timeout(self.timeout, self.processor.create_payment_intent(&request))
            .await
            .map_err(|_| StoreError::Upstream(format!("no response within {}s", self.timeout.as_secs())))?
            .map_err(|e| {
                tracing::error!(error = %e, "payment intent request failed");
                e
            })?;
        tracing::info!(intent_id = %handle.payment_intent_id, amount_minor, "payment intent created");
        Ok(handle)
    }
}

/// Processor idempotency key for the order's current payment attempt. A
/// failed attempt leaves its intent id on the order, which starts a new key.
pub fn attempt_key(order: &Order) -> String {
    match (order.payment_status(), order.payment_intent_id()) {
        (PaymentStatus::Failed, Some(failed)) => format!("order-{}-after-{}", order.id(), failed),
        _ => format!("order-{}", order.id()),
    }
}

/// The amount the client asked to pay, if the order can be paid by card for that amount.
pub fn payable_amount(order: &Order, request: &CreateIntentRequest) -> Result<Money> {
    let currency = request.currency.as_deref().unwrap_or(order.currency()).to_lowercase();
    let amount = Money::new(request.amount, &currency);
    if !amount.is_positive() { return Err(StoreError::InvalidAmount); }
    if order.payment_method() != PaymentMethod::Stripe {
        return Err(StoreError::Validation("Order is not paid by card".into()));
    }
    if matches!(order.payment_status(), PaymentStatus::Paid | PaymentStatus::Refunded) {
        return Err(StoreError::Validation("Order is already paid".into()));
    }
    if order.status() == OrderStatus::Cancelled {
        return Err(StoreError::Validation("Order is cancelled".into()));
    }
    if currency != order.currency() {
        return Err(StoreError::Validation(format!("Currency must be {}", order.currency())));
    }
    if amount.to_minor_units()? != order.total().to_minor_units()? {
        return Err(StoreError::Validation("Amount does not match the order total".into()));
    }
    Ok(amount)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Records requests and answers like the processor: one intent per idempotency key.
    #[derive(Default)]
    pub struct RecordingProcessor {
        pub requests: Mutex<Vec<IntentRequest>>,
        pub delay: Option<Duration>,
        intents: Mutex<HashMap<String, IntentHandle>>,
    }

    impl RecordingProcessor {
        pub fn delayed(delay: Duration) -> Self { Self { delay: Some(delay), ..Default::default() } }
    }

    #[async_trait]
    impl PaymentProcessor for RecordingProcessor {
        async fn create_payment_intent(&self, request: &IntentRequest) -> Result<IntentHandle> {
            if let Some(delay) = self.delay { tokio::time::sleep(delay).await; }
            self.requests.lock().await.push(request.clone());
            let mut intents = self.intents.lock().await;
            let next = intents.len() + 1;
            let handle = intents.entry(request.idempotency_key.clone()).or_insert_with(|| IntentHandle {
                client_secret: format!("pi_{}_secret", next),
                payment_intent_id: format!("pi_{}", next),
            });
            Ok(handle.clone())
        }
    }
}
