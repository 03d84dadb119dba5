//! Order Ledger
//!
//! Authoritative creation and retrieval of orders. Prices are captured from
//! the catalog at creation; status fields only change through the order
//! aggregate's transition rules.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::domain::aggregates::{AdminPatch, LineItemRequest, Order, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
use crate::domain::events::{PaymentEvent, PaymentEventKind};
use crate::domain::value_objects::Quantity;
use crate::notify::{publish_all, EventPublisher};
use crate::store::{Catalog, OrderQuery, OrderStore, Reconciliation};
use crate::{Result, StoreError};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<LineItemRequest>,
    #[validate]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(max = 1000, message = "notes are too long"))]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListFilter {
    pub status: Option<OrderStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Pagination { pub page: u32, pub limit: u32, pub total: u64, pub pages: u64 }

#[derive(Debug, Serialize)]
pub struct OrderPage { pub orders: Vec<Order>, pub pagination: Pagination }

pub struct OrderLedger {
    catalog: Arc<dyn Catalog>,
    orders: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    currency: String,
}

impl OrderLedger {
    pub fn new(catalog: Arc<dyn Catalog>, orders: Arc<dyn OrderStore>, publisher: Arc<dyn EventPublisher>, currency: impl Into<String>) -> Self {
        Self { catalog, orders, publisher, currency: currency.into().to_lowercase() }
    }

    pub fn currency(&self) -> &str { &self.currency }

    #[instrument(skip(self, request), fields(user_id = %user.user_id, items = request.items.len()))]
    pub async fn create(&self, user: &AuthUser, request: CreateOrderRequest) -> Result<Order> {
        if request.items.is_empty() { return Err(StoreError::EmptyCart); }
        request.validate()?;
        let lines = merge_lines(&request.items)?;

        let ids: Vec<String> = lines.iter().map(|(id, _)| id.clone()).collect();
        let mut products = self.catalog.find_products_by_ids(&ids).await?;
        let mut priced = Vec::with_capacity(lines.len());
        for (id, quantity) in lines {
            let idx = products.iter().position(|p| p.id == id).ok_or_else(|| StoreError::Validation(format!("Product {} not found", id)))?;
            priced.push((products.swap_remove(idx), quantity));
        }

        let mut order = Order::place(
            user.user_id.clone(), priced, request.shipping_address, request.payment_method, request.notes, &self.currency,
        )?;
        self.orders.insert(&order).await?;
        tracing::info!(order_id = %order.id(), total = %order.total(), "order placed");
        publish_all(self.publisher.as_ref(), order.take_events()).await;
        Ok(order)
    }

    pub async fn get(&self, user: &AuthUser, id: Uuid) -> Result<Order> {
        let order = self.orders.find(id).await?.ok_or_else(|| StoreError::NotFound("Order".into()))?;
        if !user.is_admin() && !order.is_owned_by(&user.user_id) {
            return Err(StoreError::Forbidden);
        }
        Ok(order)
    }

    /// Customers only ever see their own orders.
    pub async fn list(&self, user: &AuthUser, filter: &ListFilter) -> Result<OrderPage> {
        let page = filter.page.unwrap_or(1).max(1);
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let query = OrderQuery {
            user_id: (!user.is_admin()).then(|| user.user_id.clone()),
            status: filter.status,
            page,
            page_size: limit,
        };
        let (orders, total) = self.orders.list(&query).await?;
        let pages = total.div_ceil(u64::from(limit));
        Ok(OrderPage { orders, pagination: Pagination { page, limit, total, pages } })
    }

    #[instrument(skip(self, patch), fields(user_id = %user.user_id))]
    pub async fn update_admin_fields(&self, user: &AuthUser, id: Uuid, patch: AdminPatch) -> Result<Order> {
        if !user.is_admin() { return Err(StoreError::Forbidden); }
        patch.validate()?;
        if let Some(partner_id) = &patch.delivery_partner_id {
            match self.catalog.find_delivery_partner(partner_id).await? {
                Some(p) if p.is_active => {}
                Some(_) => return Err(StoreError::Validation(format!("Delivery partner {} is not active", partner_id))),
                None => return Err(StoreError::Validation(format!("Delivery partner {} does not exist", partner_id))),
            }
        }
        let mut order = self.orders.update_admin_fields(id, &patch).await?;
        tracing::info!(order_id = %id, status = %order.status(), payment_status = %order.payment_status(), "order updated by administrator");
        publish_all(self.publisher.as_ref(), order.take_events()).await;
        Ok(order)
    }

    /// Records a verified processor notification. Only the webhook reconciler calls this.
    #[instrument(skip(self, event), fields(order_id = %event.order_id, intent_id = %event.intent_id, event_type = event.kind.as_str()))]
    pub async fn apply_payment_outcome(&self, event: &PaymentEvent) -> Result<Reconciliation> {
        let mut outcome = self.orders.record_payment_event(event).await?;
        match &mut outcome {
            Reconciliation::Applied(order) => {
                tracing::info!(status = %order.status(), payment_status = %order.payment_status(), "payment outcome applied");
                publish_all(self.publisher.as_ref(), order.take_events()).await;
            }
            Reconciliation::Stale(order) => {
                if is_second_charge(order, event) {
                    tracing::error!(
                        paid_intent_id = order.payment_intent_id().unwrap_or_default(),
                        "order already paid by another intent, duplicate charge must be refunded"
                    );
                } else {
                    tracing::warn!(payment_status = %order.payment_status(), "payment outcome does not apply to current state");
                }
            }
            Reconciliation::Duplicate => tracing::info!("duplicate payment notification"),
            Reconciliation::OrderNotFound => tracing::warn!("payment notification for unknown order"),
        }
        Ok(outcome)
    }

    /// Cancels card orders that have waited for payment longer than `max_age`.
    pub async fn cancel_stale_pending(&self, max_age: chrono::Duration) -> Result<Vec<Order>> {
        let cutoff = Utc::now() - max_age;
        let mut cancelled = self.orders.cancel_abandoned(cutoff).await?;
        for order in cancelled.iter_mut() {
            publish_all(self.publisher.as_ref(), order.take_events()).await;
        }
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), %cutoff, "cancelled stale pending orders");
        }
        Ok(cancelled)
    }
}

/// A success for an order that another intent has already paid.
pub fn is_second_charge(order: &Order, event: &PaymentEvent) -> bool {
    event.kind == PaymentEventKind::Succeeded
        && matches!(order.payment_status(), PaymentStatus::Paid | PaymentStatus::Refunded)
        && order.payment_intent_id() != Some(event.intent_id.as_str())
}

/// Sums quantities for repeated products, keeping first-seen order.
fn merge_lines(items: &[LineItemRequest]) -> Result<Vec<(String, Quantity)>> {
    let mut merged: Vec<(String, Quantity)> = Vec::with_capacity(items.len());
    for item in items {
        let quantity = Quantity::new(item.quantity)
            .map_err(|_| StoreError::Validation(format!("Quantity for product {} must be at least 1", item.product_id)))?;
        match merged.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, existing)) => *existing = existing.add(quantity),
            None => merged.push((item.product_id.clone(), quantity)),
        }
    }
    Ok(merged)
}

/// Runs `cancel_stale_pending` every `every` until the task is aborted.
pub fn spawn_stale_sweeper(ledger: Arc<OrderLedger>, max_age: chrono::Duration, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = ledger.cancel_stale_pending(max_age).await {
                tracing::error!(error = %e, "stale order sweep failed");
            }
        }
    })
}
