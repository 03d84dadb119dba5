//! Postgres adapters using runtime-checked sqlx queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{event_key, Catalog, OrderQuery, OrderStore, Reconciliation};
use crate::domain::aggregates::{
    AdminPatch, DeliveryPartner, LineItem, Order, OrderStatus, PaymentApplication, PaymentMethod, PaymentStatus, Product,
    ProductStatus, ShippingAddress, UnknownVariant,
};
use crate::domain::events::PaymentEvent;
use crate::{Result, StoreError};

const ORDER_BY_ID: &str = "SELECT * FROM orders WHERE id = $1";
const ORDER_BY_TRACKING_NUMBER: &str = "SELECT * FROM orders WHERE tracking_number = $1";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String, sku: String, slug: String, name: String, name_en: String, name_bn: String,
    price: Decimal, sale_price: Option<Decimal>, stock: i32, status: String, category_id: Option<String>,
    images: Vec<String>, featured: bool, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryPartnerRow {
    id: String, name: String, name_en: String, name_bn: String, contact_info: serde_json::Value,
    service_areas: Vec<String>, is_active: bool, created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid, user_id: String, total_amount: Decimal, currency: String, status: String, payment_status: String,
    payment_method: String, payment_intent_id: Option<String>, tracking_number: Option<String>,
    delivery_partner_id: Option<String>, notes: Option<String>, shipping_address: Json<ShippingAddress>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow { id: Uuid, order_id: Uuid, product_id: String, name: String, sku: String, quantity: i32, unit_price: Decimal }

fn decode<T: FromStr<Err = UnknownVariant>>(text: &str) -> Result<T> {
    text.parse::<T>().map_err(|e| StoreError::Storage(sqlx::Error::Decode(Box::new(e))))
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Product {
            status: decode::<ProductStatus>(&r.status)?,
            id: r.id, sku: r.sku, slug: r.slug, name: r.name, name_en: r.name_en, name_bn: r.name_bn,
            price: r.price, sale_price: r.sale_price, stock: r.stock, category_id: r.category_id,
            images: r.images, featured: r.featured, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

impl From<DeliveryPartnerRow> for DeliveryPartner {
    fn from(r: DeliveryPartnerRow) -> Self {
        DeliveryPartner {
            id: r.id, name: r.name, name_en: r.name_en, name_bn: r.name_bn, contact_info: r.contact_info,
            service_areas: r.service_areas, is_active: r.is_active, created_at: r.created_at,
        }
    }
}

fn hydrate(row: OrderRow, items: Vec<OrderItemRow>) -> Result<Order> {
    Ok(Order {
        id: row.id, user_id: row.user_id, total_amount: row.total_amount, currency: row.currency,
        status: decode::<OrderStatus>(&row.status)?,
        payment_status: decode::<PaymentStatus>(&row.payment_status)?,
        payment_method: decode::<PaymentMethod>(&row.payment_method)?,
        payment_intent_id: row.payment_intent_id, tracking_number: row.tracking_number,
        delivery_partner_id: row.delivery_partner_id, notes: row.notes, shipping_address: row.shipping_address.0,
        created_at: row.created_at, updated_at: row.updated_at, events: vec![],
        items: items
            .into_iter()
            .map(|i| LineItem {
                id: i.id, product_id: i.product_id, name: i.name, sku: i.sku,
                quantity: u32::try_from(i.quantity).unwrap_or_default(), price: i.unit_price,
            })
            .collect(),
    })
}

fn unique_violation(e: sqlx::Error, message: impl Into<String>) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Validation(message.into()),
        _ => StoreError::Storage(e),
    }
}

#[derive(Clone)]
pub struct PgCatalog { db: PgPool }

impl PgCatalog {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn find_products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1)")
            .bind(ids.to_vec()).fetch_all(&self.db).await?
            .into_iter().map(Product::try_from).collect()
    }

    async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.db).await?
            .map(Product::try_from).transpose()
    }

    async fn find_delivery_partner(&self, id: &str) -> Result<Option<DeliveryPartner>> {
        let row = sqlx::query_as::<_, DeliveryPartnerRow>("SELECT * FROM delivery_partners WHERE id = $1")
            .bind(id).fetch_optional(&self.db).await?;
        Ok(row.map(DeliveryPartner::from))
    }
}

#[derive(Clone)]
pub struct PgOrderStore { db: PgPool }

impl PgOrderStore {
    pub fn new(db: PgPool) -> Self { Self { db } }

    async fn items_for(conn: &mut PgConnection, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItemRow>>> {
        let rows = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id")
            .bind(ids.to_vec()).fetch_all(&mut *conn).await?;
        let mut by_order: HashMap<Uuid, Vec<OrderItemRow>> = HashMap::new();
        for row in rows { by_order.entry(row.order_id).or_default().push(row); }
        Ok(by_order)
    }

    async fn hydrate_all(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = Self::items_for(conn, &ids).await?;
        rows.into_iter().map(|r| { let lines = items.remove(&r.id).unwrap_or_default(); hydrate(r, lines) }).collect()
    }

    /// Runs a single-row order `sql` with `value` bound as `$1`.
    async fn fetch_one_where<'q, V>(&self, sql: &'q str, value: V) -> Result<Option<Order>>
    where
        V: 'q + Send + sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres>,
    {
        let mut conn = self.db.acquire().await?;
        let row = sqlx::query_as::<_, OrderRow>(sql).bind(value).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => Ok(Self::hydrate_all(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn lock_order(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => Ok(Self::hydrate_all(conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn write_state(conn: &mut PgConnection, o: &Order) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, payment_status = $3, payment_intent_id = $4, tracking_number = $5, delivery_partner_id = $6, notes = $7, updated_at = $8 WHERE id = $1")
            .bind(o.id).bind(o.status.as_str()).bind(o.payment_status.as_str()).bind(&o.payment_intent_id)
            .bind(&o.tracking_number).bind(&o.delivery_partner_id).bind(&o.notes).bind(o.updated_at)
            .execute(&mut *conn).await
            .map_err(|e| unique_violation(e, "Tracking number is already in use"))?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, o: &Order) -> Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("INSERT INTO orders (id, user_id, total_amount, currency, status, payment_status, payment_method, payment_intent_id, tracking_number, delivery_partner_id, notes, shipping_address, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
            .bind(o.id).bind(&o.user_id).bind(o.total_amount).bind(&o.currency).bind(o.status.as_str())
            .bind(o.payment_status.as_str()).bind(o.payment_method.as_str()).bind(&o.payment_intent_id)
            .bind(&o.tracking_number).bind(&o.delivery_partner_id).bind(&o.notes).bind(Json(&o.shipping_address))
            .bind(o.created_at).bind(o.updated_at)
            .execute(&mut *tx).await?;
        for item in &o.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| StoreError::Validation("Quantity is too large".into()))?;
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, name, sku, quantity, unit_price) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(item.id).bind(o.id).bind(&item.product_id).bind(&item.name).bind(&item.sku).bind(quantity).bind(item.price)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>> { self.fetch_one_where(ORDER_BY_ID, id).await }

    async fn find_by_tracking_number(&self, code: &str) -> Result<Option<Order>> {
        self.fetch_one_where(ORDER_BY_TRACKING_NUMBER, code).await
    }

    async fn list(&self, q: &OrderQuery) -> Result<(Vec<Order>, u64)> {
        let mut conn = self.db.acquire().await?;
        let status = q.status.map(|s| s.as_str());
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE ($1::text IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2) ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4")
            .bind(&q.user_id).bind(status).bind(i64::from(q.page_size)).bind(i64::try_from(q.offset()).unwrap_or(i64::MAX))
            .fetch_all(&mut *conn).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::text IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)")
            .bind(&q.user_id).bind(status).fetch_one(&mut *conn).await?;
        let orders = Self::hydrate_all(&mut conn, rows).await?;
        Ok((orders, u64::try_from(total.0).unwrap_or_default()))
    }

    async fn update_admin_fields(&self, id: Uuid, patch: &AdminPatch) -> Result<Order> {
        let mut tx = self.db.begin().await?;
        let mut order = Self::lock_order(&mut tx, id).await?.ok_or_else(|| StoreError::NotFound(format!("Order {}", id)))?;
        order.apply_admin_patch(patch)?;
        Self::write_state(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn record_payment_event(&self, event: &PaymentEvent) -> Result<Reconciliation> {
        let (intent_id, event_type) = event_key(event);
        let mut tx = self.db.begin().await?;
        let claimed = sqlx::query("INSERT INTO payment_events (intent_id, event_type, order_id, processor_event_id, outcome, received_at) VALUES ($1, $2, $3, $4, 'processing', NOW()) ON CONFLICT (intent_id, event_type) DO NOTHING")
            .bind(&intent_id).bind(event_type).bind(event.order_id).bind(&event.processor_event_id)
            .execute(&mut *tx).await?
            .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(Reconciliation::Duplicate);
        }
        let Some(mut order) = Self::lock_order(&mut tx, event.order_id).await? else {
            tx.rollback().await?;
            return Ok(Reconciliation::OrderNotFound);
        };
        let result = match order.apply_payment_event(event) {
            PaymentApplication::Applied { .. } => {
                Self::write_state(&mut tx, &order).await?;
                Reconciliation::Applied(order)
            }
            PaymentApplication::Stale => Reconciliation::Stale(order),
        };
        sqlx::query("UPDATE payment_events SET outcome = $3 WHERE intent_id = $1 AND event_type = $2")
            .bind(&intent_id).bind(event_type).bind(result.label())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn cancel_abandoned(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let mut tx = self.db.begin().await?;
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE payment_method = 'STRIPE' AND status = 'PENDING' AND payment_status IN ('PENDING', 'FAILED') AND created_at < $1 FOR UPDATE SKIP LOCKED")
            .bind(cutoff).fetch_all(&mut *tx).await?;
        let mut orders = Self::hydrate_all(&mut tx, rows).await?;
        for order in orders.iter_mut() {
            order.expire()?;
            Self::write_state(&mut tx, order).await?;
        }
        tx.commit().await?;
        Ok(orders)
    }
}
