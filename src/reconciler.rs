//! Webhook Reconciler
//!
//! Verifies processor notifications and applies each (intent, event type)
//! pair to the ledger at most once. Every outcome other than a bad signature
//! or a storage failure is acknowledged so the processor stops redelivering.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::events::{PaymentEvent, PaymentEventKind};
use crate::ledger::OrderLedger;
use crate::payments::signature;
use crate::payments::ORDER_ID_METADATA;
use crate::store::Reconciliation;
use crate::{Result, StoreError};

#[derive(Debug, Deserialize)]
struct ProcessorEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EventData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventData { object: serde_json::Value }

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntentObject {
    id: Option<String>,
    amount: Option<i64>,
    metadata: std::collections::HashMap<String, String>,
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct PaymentError { message: Option<String>, code: Option<String> }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason { UnhandledType, MissingCorrelation, UnknownOrder }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    /// Acknowledged; the order's current state does not accept the transition.
    Stale,
    Ignored(IgnoreReason),
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
            Self::Ignored(_) => "ignored",
        }
    }
}

pub struct WebhookReconciler {
    ledger: Arc<OrderLedger>,
    secret: String,
    tolerance_secs: i64,
}

impl WebhookReconciler {
    pub fn new(ledger: Arc<OrderLedger>, secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self { ledger, secret: secret.into(), tolerance_secs }
    }

    pub async fn handle(&self, payload: &[u8], signature_header: &str) -> Result<WebhookOutcome> {
        self.handle_at(payload, signature_header, Utc::now().timestamp()).await
    }

    /// Same as [`handle`](Self::handle) with an explicit clock, in unix seconds.
    #[instrument(skip_all, fields(bytes = payload.len()))]
    pub async fn handle_at(&self, payload: &[u8], signature_header: &str, now: i64) -> Result<WebhookOutcome> {
        signature::verify(payload, signature_header, &self.secret, self.tolerance_secs, now).map_err(|e| {
            tracing::warn!(error = %e, "rejected webhook signature");
            StoreError::InvalidSignature(e.to_string())
        })?;

        let event: ProcessorEvent = serde_json::from_slice(payload)
            .map_err(|e| StoreError::Validation(format!("Malformed webhook payload: {}", e)))?;
        let payment_event = match correlate(event) {
            Ok(e) => e,
            Err(reason) => return Ok(WebhookOutcome::Ignored(reason)),
        };

        let outcome = match self.ledger.apply_payment_outcome(&payment_event).await? {
            Reconciliation::Applied(order) => {
                let expected = order.total().to_minor_units().ok();
                if let (Some(paid), Some(expected)) = (payment_event.amount_minor, expected) {
                    if payment_event.kind == PaymentEventKind::Succeeded && paid != expected {
                        tracing::warn!(order_id = %order.id(), paid, expected, "paid amount differs from order total");
                    }
                }
                WebhookOutcome::Applied
            }
            Reconciliation::Duplicate => WebhookOutcome::Duplicate,
            Reconciliation::Stale(_) => WebhookOutcome::Stale,
            Reconciliation::OrderNotFound => WebhookOutcome::Ignored(IgnoreReason::UnknownOrder),
        };
        Ok(outcome)
    }
}

fn correlate(event: ProcessorEvent) -> std::result::Result<PaymentEvent, IgnoreReason> {
    let kind = match event.event_type.as_str() {
        "payment_intent.succeeded" => PaymentEventKind::Succeeded,
        "payment_intent.payment_failed" => PaymentEventKind::Failed,
        other => {
            tracing::info!(event_type = other, "ignoring unhandled webhook event");
            return Err(IgnoreReason::UnhandledType);
        }
    };
    let object: IntentObject = serde_json::from_value(event.data.object).unwrap_or_default();
    let order_id = object.metadata.get(ORDER_ID_METADATA).and_then(|v| Uuid::parse_str(v).ok());
    let (Some(intent_id), Some(order_id)) = (object.id, order_id) else {
        tracing::info!(event_type = kind.as_str(), "webhook event has no order correlation");
        return Err(IgnoreReason::MissingCorrelation);
    };
    let failure_message = object.last_payment_error.and_then(|e| e.message.or(e.code));
    Ok(PaymentEvent { processor_event_id: event.id, intent_id, order_id, kind, amount_minor: object.amount, failure_message })
}
