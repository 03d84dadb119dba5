//! Persistence ports for the catalog and the order ledger.
//!
//! Every adapter must apply status changes through the order aggregate while
//! holding the order exclusively (row lock or store lock), so concurrent admin
//! patches and webhook deliveries serialize per order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{AdminPatch, DeliveryPartner, Order, OrderStatus, Product};
use crate::domain::events::PaymentEvent;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCatalog, MemoryOrderStore};
pub use postgres::{PgCatalog, PgOrderStore};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>>;
    async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>>;
    async fn find_delivery_partner(&self, id: &str) -> Result<Option<DeliveryPartner>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order and all its line items, or nothing.
    async fn insert(&self, order: &Order) -> Result<()>;
    async fn find(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_by_tracking_number(&self, code: &str) -> Result<Option<Order>>;
    /// One page of orders, newest first, plus the total matching count.
    async fn list(&self, query: &OrderQuery) -> Result<(Vec<Order>, u64)>;
    /// Fails with `NotFound` for an unknown order and `InvalidTransition` when the table rejects the patch.
    async fn update_admin_fields(&self, id: Uuid, patch: &AdminPatch) -> Result<Order>;
    /// Claims the event's idempotency key and applies it, atomically.
    async fn record_payment_event(&self, event: &PaymentEvent) -> Result<Reconciliation>;
    /// Cancels abandoned card orders created before `cutoff` and returns them.
    async fn cancel_abandoned(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
}

#[derive(Clone, Debug)]
pub struct OrderQuery {
    /// Restricts the page to one customer's orders.
    pub user_id: Option<String>,
    pub status: Option<OrderStatus>,
    /// 1-indexed.
    pub page: u32,
    pub page_size: u32,
}

impl OrderQuery {
    pub fn offset(&self) -> u64 { u64::from(self.page.max(1) - 1) * u64::from(self.page_size) }

    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.as_deref().map_or(true, |u| order.is_owned_by(u)) && self.status.map_or(true, |s| order.status() == s)
    }
}

/// Result of handing a payment event to the store.
#[derive(Clone, Debug)]
pub enum Reconciliation {
    Applied(Order),
    /// The same intent and event type were already processed.
    Duplicate,
    /// Recorded, but the order's current state does not accept it.
    Stale(Order),
    OrderNotFound,
}

impl Reconciliation {
    pub fn label(&self) -> &'static str {
        match self { Self::Applied(_) => "applied", Self::Duplicate => "duplicate", Self::Stale(_) => "stale", Self::OrderNotFound => "order_not_found" }
    }
}

/// The idempotency key for a processor notification.
pub(crate) fn event_key(event: &PaymentEvent) -> (String, &'static str) { (event.intent_id.clone(), event.kind.as_str()) }
