//! In-process adapters. One lock per store gives the same per-order
//! serialization the Postgres adapter gets from row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{event_key, Catalog, OrderQuery, OrderStore, Reconciliation};
use crate::domain::aggregates::{AdminPatch, DeliveryPartner, Order, PaymentApplication, Product};
use crate::domain::events::PaymentEvent;
use crate::{Result, StoreError};

#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
    partners: RwLock<HashMap<String, DeliveryPartner>>,
}

impl MemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub async fn upsert_product(&self, product: Product) { self.products.write().await.insert(product.id.clone(), product); }

    pub async fn upsert_partner(&self, partner: DeliveryPartner) { self.partners.write().await.insert(partner.id.clone(), partner); }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn find_products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>> {
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }

    async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>> { Ok(self.products.read().await.get(id).cloned()) }

    async fn find_delivery_partner(&self, id: &str) -> Result<Option<DeliveryPartner>> { Ok(self.partners.read().await.get(id).cloned()) }
}

#[derive(Default)]
struct Ledger {
    orders: HashMap<Uuid, Order>,
    processed: HashSet<(String, &'static str)>,
}

#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Ledger>,
    unavailable: AtomicBool,
}

impl MemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    /// Makes every write fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) { self.unavailable.store(unavailable, Ordering::SeqCst); }

    fn check_writable(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) { return Err(StoreError::Storage(sqlx::Error::PoolTimedOut)); }
        Ok(())
    }
}

fn stored(order: &Order) -> Order {
    let mut copy = order.clone();
    copy.events.clear();
    copy
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        self.check_writable()?;
        self.inner.lock().await.orders.insert(order.id(), stored(order));
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>> { Ok(self.inner.lock().await.orders.get(&id).cloned()) }

    async fn find_by_tracking_number(&self, code: &str) -> Result<Option<Order>> {
        let ledger = self.inner.lock().await;
        Ok(ledger.orders.values().find(|o| o.tracking_number() == Some(code)).cloned())
    }

    async fn list(&self, query: &OrderQuery) -> Result<(Vec<Order>, u64)> {
        let ledger = self.inner.lock().await;
        let mut matching: Vec<&Order> = ledger.orders.values().filter(|o| query.matches(o)).collect();
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| b.id().cmp(&a.id())));
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn update_admin_fields(&self, id: Uuid, patch: &AdminPatch) -> Result<Order> {
        self.check_writable()?;
        let mut ledger = self.inner.lock().await;
        if let Some(code) = &patch.tracking_number {
            if ledger.orders.values().any(|o| o.id() != id && o.tracking_number() == Some(code.as_str())) {
                return Err(StoreError::Validation(format!("Tracking number {} is already in use", code)));
            }
        }
        let current = ledger.orders.get(&id).ok_or_else(|| StoreError::NotFound(format!("Order {}", id)))?;
        let mut order = current.clone();
        order.apply_admin_patch(patch)?;
        ledger.orders.insert(id, stored(&order));
        Ok(order)
    }

    async fn record_payment_event(&self, event: &PaymentEvent) -> Result<Reconciliation> {
        self.check_writable()?;
        let mut ledger = self.inner.lock().await;
        let key = event_key(event);
        if ledger.processed.contains(&key) { return Ok(Reconciliation::Duplicate); }
        let Some(current) = ledger.orders.get(&event.order_id) else { return Ok(Reconciliation::OrderNotFound) };
        let mut order = current.clone();
        let outcome = order.apply_payment_event(event);
        ledger.processed.insert(key);
        match outcome {
            PaymentApplication::Applied { .. } => {
                ledger.orders.insert(order.id(), stored(&order));
                Ok(Reconciliation::Applied(order))
            }
            PaymentApplication::Stale => Ok(Reconciliation::Stale(order)),
        }
    }

    async fn cancel_abandoned(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        self.check_writable()?;
        let mut ledger = self.inner.lock().await;
        let mut cancelled = Vec::new();
        for order in ledger.orders.values_mut().filter(|o| o.is_abandoned(cutoff)) {
            order.expire()?;
            cancelled.push(order.clone());
            order.events.clear();
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
    use crate::domain::value_objects::Quantity;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn order(user: &str) -> Order {
        let product = Product::new("p1", "Widget", Decimal::TEN);
        Order::place(user, vec![(product, Quantity::new(1).unwrap())], ShippingAddress::default(), PaymentMethod::Stripe, None, "usd").unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_event_is_noop() {
        let store = MemoryOrderStore::new();
        let o = order("u1");
        store.insert(&o).await.unwrap();
        let event = PaymentEvent::succeeded(o.id(), "pi_1");
        assert!(matches!(store.record_payment_event(&event).await.unwrap(), Reconciliation::Applied(_)));
        assert!(matches!(store.record_payment_event(&event).await.unwrap(), Reconciliation::Duplicate));
        let saved = store.find(o.id()).await.unwrap().unwrap();
        assert_eq!((saved.status(), saved.payment_status()), (OrderStatus::Confirmed, PaymentStatus::Paid));
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_apply_once() {
        let store = Arc::new(MemoryOrderStore::new());
        let o = order("u1");
        store.insert(&o).await.unwrap();
        let event = PaymentEvent::succeeded(o.id(), "pi_1");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (store, event) = (store.clone(), event.clone());
                tokio::spawn(async move { store.record_payment_event(&event).await.unwrap() })
            })
            .collect();
        let mut applied = 0;
        for h in handles {
            if matches!(h.await.unwrap(), Reconciliation::Applied(_)) { applied += 1; }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_claim_event() {
        let store = MemoryOrderStore::new();
        let o = order("u1");
        store.insert(&o).await.unwrap();
        let event = PaymentEvent::succeeded(o.id(), "pi_1");
        store.set_unavailable(true);
        assert!(store.record_payment_event(&event).await.is_err());
        store.set_unavailable(false);
        assert!(matches!(store.record_payment_event(&event).await.unwrap(), Reconciliation::Applied(_)));
    }

    #[tokio::test]
    async fn test_list_scopes_and_pages() {
        let store = MemoryOrderStore::new();
        for user in ["u1", "u1", "u2"] { store.insert(&order(user)).await.unwrap(); }
        let query = OrderQuery { user_id: Some("u1".into()), status: None, page: 1, page_size: 1 };
        let (page, total) = store.list(&query).await.unwrap();
        assert_eq!((page.len(), total), (1, 2));
        let beyond = OrderQuery { page: 5, ..query };
        let (page, total) = store.list(&beyond).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(total, 2);
    }
}
