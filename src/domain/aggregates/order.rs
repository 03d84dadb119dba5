//! Order Aggregate
//!
//! Every change to `status` and `payment_status` goes through the transition
//! rules on [`OrderStatus`] and [`PaymentStatus`]. Admin patches and payment
//! notifications are the only two mutation paths.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::product::{Product, ProductError, UnknownVariant};
use crate::domain::events::{OrderEvent, PaymentEvent, PaymentEventKind};
use crate::domain::value_objects::{Money, MoneyError, Quantity};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) user_id: String,
    pub(crate) items: Vec<LineItem>,
    pub(crate) total_amount: Decimal,
    pub(crate) currency: String,
    pub(crate) status: OrderStatus,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) payment_intent_id: Option<String>,
    pub(crate) tracking_number: Option<String>,
    pub(crate) delivery_partner_id: Option<String>,
    pub(crate) notes: Option<String>,
    pub(crate) shipping_address: ShippingAddress,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<OrderEvent>,
}

/// Unit price and product details are captured when the order is placed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem { pub id: Uuid, pub product_id: String, pub name: String, pub sku: String, pub quantity: u32, pub price: Decimal }

/// One requested line of a checkout: which product and how many.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRequest { pub product_id: String, pub quantity: u32 }

impl LineItem {
    pub fn line_total(&self) -> Decimal { self.price * Decimal::from(self.quantity) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 120, message = "full name is required"))]
    pub full_name: String,
    #[serde(default)]
    #[validate(email(message = "email is invalid"))]
    pub email: Option<String>,
    #[validate(length(min = 5, max = 30, message = "phone number is invalid"))]
    pub phone: String,
    #[validate(length(min = 1, max = 300, message = "street address is required"))]
    pub address: String,
    #[validate(length(min = 1, max = 100, message = "city is required"))]
    pub city: String,
    #[serde(default)]
    #[validate(length(max = 20, message = "postal code is too long"))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 60, message = "country is required"))]
    pub country: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod { #[default] Stripe, CashOnDelivery }

impl OrderStatus {
    /// Fulfillment timeline shown to customers. `Cancelled` is off the line.
    pub const TIMELINE: [OrderStatus; 5] = [Self::Pending, Self::Confirmed, Self::Processing, Self::Shipped, Self::Delivered];

    pub fn timeline_position(&self) -> Option<usize> { Self::TIMELINE.iter().position(|s| s == self) }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Forward along the timeline, or to `Cancelled` from any non-terminal state.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() { return false; }
        if next == Self::Cancelled { return true; }
        matches!((self.timeline_position(), next.timeline_position()), (Some(from), Some(to)) if to > from)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING", Self::Confirmed => "CONFIRMED", Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED", Self::Delivered => "DELIVERED", Self::Cancelled => "CANCELLED",
        }
    }
}

impl PaymentStatus {
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Pending, Paid) | (Pending, Failed) | (Failed, Pending) | (Failed, Paid) | (Paid, Refunded))
    }

    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Paid => "PAID", Self::Failed => "FAILED", Self::Refunded => "REFUNDED" }
    }
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Stripe => "STRIPE", Self::CashOnDelivery => "CASH_ON_DELIVERY" }
    }
}

macro_rules! text_enum {
    ($ty:ident { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s { $($text => Ok(Self::$variant),)+ other => Err(UnknownVariant(other.to_string())) }
            }
        }
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }
    };
}

text_enum!(OrderStatus { "PENDING" => Pending, "CONFIRMED" => Confirmed, "PROCESSING" => Processing, "SHIPPED" => Shipped, "DELIVERED" => Delivered, "CANCELLED" => Cancelled });
text_enum!(PaymentStatus { "PENDING" => Pending, "PAID" => Paid, "FAILED" => Failed, "REFUNDED" => Refunded });
text_enum!(PaymentMethod { "STRIPE" => Stripe, "CASH_ON_DELIVERY" => CashOnDelivery });

/// Fields an administrator may change. Absent fields are left alone.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    #[validate(length(min = 1, max = 64))]
    pub delivery_partner_id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub tracking_number: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// What a payment notification did to the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentApplication {
    Applied { previous_status: OrderStatus, previous_payment: PaymentStatus },
    /// The order's current state does not accept this outcome; nothing changed.
    Stale,
}

impl Order {
    /// Builds a new order from catalog products, capturing each product's current price.
    pub fn place(
        user_id: impl Into<String>,
        lines: Vec<(Product, Quantity)>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        notes: Option<String>,
        currency: &str,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() { return Err(OrderError::NoItems); }
        let mut total = Money::zero(currency);
        let mut items = Vec::with_capacity(lines.len());
        for (product, quantity) in lines {
            product.check_purchasable(quantity.value())?;
            let unit = Money::new(product.effective_price(), currency);
            total = total.add(&unit.multiply(quantity.value())?)?;
            items.push(LineItem {
                id: Uuid::now_v7(), product_id: product.id, name: product.name, sku: product.sku,
                quantity: quantity.value(), price: unit.amount(),
            });
        }
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::now_v7(), user_id: user_id.into(), items, total_amount: total.amount(), currency: total.currency().to_string(),
            status: OrderStatus::Pending, payment_status: PaymentStatus::Pending, payment_method,
            payment_intent_id: None, tracking_number: None, delivery_partner_id: None, notes,
            shipping_address, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(OrderEvent::Placed {
            order_id: order.id, user_id: order.user_id.clone(), total: order.total_amount, currency: order.currency.clone(),
        });
        Ok(order)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> &str { &self.user_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn total_amount(&self) -> Decimal { self.total_amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn total(&self) -> Money { Money::new(self.total_amount, &self.currency) }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment_intent_id(&self) -> Option<&str> { self.payment_intent_id.as_deref() }
    pub fn tracking_number(&self) -> Option<&str> { self.tracking_number.as_deref() }
    pub fn delivery_partner_id(&self) -> Option<&str> { self.delivery_partner_id.as_deref() }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }
    pub fn shipping_address(&self) -> &ShippingAddress { &self.shipping_address }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn is_owned_by(&self, user_id: &str) -> bool { self.user_id == user_id }

    /// Applies an admin patch. Both status changes are checked before anything is written.
    pub fn apply_admin_patch(&mut self, patch: &AdminPatch) -> Result<(), OrderError> {
        let status = patch.status.filter(|s| *s != self.status);
        let payment = patch.payment_status.filter(|p| *p != self.payment_status);
        if let Some(next) = status {
            if !self.status.can_transition_to(next) {
                return Err(OrderError::invalid("status", self.status.as_str(), next.as_str()));
            }
        }
        if let Some(next) = payment {
            if !self.payment_status.can_transition_to(next) {
                return Err(OrderError::invalid("paymentStatus", self.payment_status.as_str(), next.as_str()));
            }
        }

        if let Some(next) = status {
            let from = std::mem::replace(&mut self.status, next);
            let event = if next == OrderStatus::Cancelled {
                OrderEvent::Cancelled { order_id: self.id, reason: "cancelled by administrator".into() }
            } else {
                OrderEvent::StatusChanged { order_id: self.id, from, to: next }
            };
            self.raise_event(event);
        }
        if let Some(next) = payment {
            let from = std::mem::replace(&mut self.payment_status, next);
            self.raise_event(OrderEvent::PaymentStatusChanged { order_id: self.id, from, to: next });
        }
        if let Some(partner) = &patch.delivery_partner_id { self.delivery_partner_id = Some(partner.clone()); }
        if let Some(code) = &patch.tracking_number { self.tracking_number = Some(code.clone()); }
        if let Some(notes) = &patch.notes { self.notes = Some(notes.clone()); }
        self.touch();
        Ok(())
    }

    /// Applies a processor notification if the current payment state accepts it.
    pub fn apply_payment_event(&mut self, event: &PaymentEvent) -> PaymentApplication {
        let target = match event.kind {
            PaymentEventKind::Succeeded => PaymentStatus::Paid,
            PaymentEventKind::Failed => PaymentStatus::Failed,
        };
        if !self.payment_status.can_transition_to(target) { return PaymentApplication::Stale; }

        let previous_status = self.status;
        let previous_payment = std::mem::replace(&mut self.payment_status, target);
        self.payment_intent_id = Some(event.intent_id.clone());
        match event.kind {
            PaymentEventKind::Succeeded => {
                if self.status == OrderStatus::Pending { self.status = OrderStatus::Confirmed; }
                self.raise_event(OrderEvent::PaymentConfirmed { order_id: self.id, intent_id: event.intent_id.clone() });
            }
            PaymentEventKind::Failed => {
                self.raise_event(OrderEvent::PaymentFailed {
                    order_id: self.id, intent_id: event.intent_id.clone(), reason: event.failure_message.clone(),
                });
            }
        }
        self.touch();
        PaymentApplication::Applied { previous_status, previous_payment }
    }

    /// Card orders still waiting for payment that were placed before `cutoff`.
    pub fn is_abandoned(&self, cutoff: DateTime<Utc>) -> bool {
        self.payment_method == PaymentMethod::Stripe
            && self.status == OrderStatus::Pending
            && matches!(self.payment_status, PaymentStatus::Pending | PaymentStatus::Failed)
            && self.created_at < cutoff
    }

    pub fn expire(&mut self) -> Result<(), OrderError> {
        if !self.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(OrderError::invalid("status", self.status.as_str(), OrderStatus::Cancelled.as_str()));
        }
        self.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(OrderEvent::Cancelled { order_id: self.id, reason: "payment not completed in time".into() });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    NoItems,
    Product(ProductError),
    Money(MoneyError),
    InvalidTransition { field: &'static str, from: &'static str, to: &'static str },
}

impl OrderError {
    fn invalid(field: &'static str, from: &'static str, to: &'static str) -> Self { Self::InvalidTransition { field, from, to } }
}

impl From<ProductError> for OrderError { fn from(e: ProductError) -> Self { Self::Product(e) } }
impl From<MoneyError> for OrderError { fn from(e: MoneyError) -> Self { Self::Money(e) } }

impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::Product(e) => write!(f, "{}", e),
            Self::Money(e) => write!(f, "{}", e),
            Self::InvalidTransition { field, from, to } => write!(f, "Cannot change {} from {} to {}", field, from, to),
        }
    }
}
