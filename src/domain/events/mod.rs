//! Domain events and payment processor notifications
use crate::domain::aggregates::{OrderStatus, PaymentStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Something that happened to an order, published after the write commits.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OrderEvent {
    Placed { order_id: Uuid, user_id: String, total: Decimal, currency: String },
    PaymentConfirmed { order_id: Uuid, intent_id: String },
    PaymentFailed { order_id: Uuid, intent_id: String, reason: Option<String> },
    PaymentStatusChanged { order_id: Uuid, from: PaymentStatus, to: PaymentStatus },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    Cancelled { order_id: Uuid, reason: String },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Placed { order_id, .. }
            | Self::PaymentConfirmed { order_id, .. }
            | Self::PaymentFailed { order_id, .. }
            | Self::PaymentStatusChanged { order_id, .. }
            | Self::StatusChanged { order_id, .. }
            | Self::Cancelled { order_id, .. } => *order_id,
        }
    }

    /// Subject suffix used when the event is published.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "placed",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::PaymentStatusChanged { .. } => "payment_status_changed",
            Self::StatusChanged { .. } => "status_changed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentEventKind { Succeeded, Failed }

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Succeeded => "payment_intent.succeeded", Self::Failed => "payment_intent.payment_failed" }
    }
}

/// A verified processor notification correlated to one of our orders.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentEvent {
    pub processor_event_id: Option<String>,
    pub intent_id: String,
    pub order_id: Uuid,
    pub kind: PaymentEventKind,
    pub amount_minor: Option<i64>,
    pub failure_message: Option<String>,
}

impl PaymentEvent {
    pub fn succeeded(order_id: Uuid, intent_id: impl Into<String>) -> Self {
        Self { processor_event_id: None, intent_id: intent_id.into(), order_id, kind: PaymentEventKind::Succeeded, amount_minor: None, failure_message: None }
    }

    pub fn failed(order_id: Uuid, intent_id: impl Into<String>, reason: Option<String>) -> Self {
        Self { processor_event_id: None, intent_id: intent_id.into(), order_id, kind: PaymentEventKind::Failed, amount_minor: None, failure_message: reason }
    }
}
