//! Tracking Reader
//!
//! Public, read-only order view looked up by order id or tracking number.
//! Contact details that would identify the recipient's door are withheld.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus};
use crate::store::{Catalog, OrderStore};
use crate::{Result, StoreError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStep { pub status: OrderStatus, pub reached: bool }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub product_id: String,
    pub name: String,
    pub name_en: Option<String>,
    pub name_bn: Option<String>,
    pub image: Option<String>,
    pub quantity: u32,
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient { pub full_name: String, pub city: String, pub postal_code: String, pub country: String }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSummary { pub name: String, pub name_en: String, pub name_bn: String, pub contact_info: serde_json::Value }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub timeline: Vec<TimelineStep>,
    /// Index into `timeline`; absent for cancelled orders.
    pub timeline_position: Option<usize>,
    pub tracking_number: Option<String>,
    pub items: Vec<TrackedItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub recipient: Recipient,
    pub delivery_partner: Option<PartnerSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct TrackingReader {
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn Catalog>,
}

impl TrackingReader {
    pub fn new(orders: Arc<dyn OrderStore>, catalog: Arc<dyn Catalog>) -> Self { Self { orders, catalog } }

    pub async fn track(&self, query: &str) -> Result<TrackingView> {
        let query = query.trim();
        if query.is_empty() { return Err(StoreError::NotFound("Order".into())); }
        let by_id = match Uuid::parse_str(query) {
            Ok(id) => self.orders.find(id).await?,
            Err(_) => None,
        };
        let order = match by_id {
            Some(order) => order,
            None => self.orders.find_by_tracking_number(query).await?.ok_or_else(|| StoreError::NotFound("Order".into()))?,
        };
        self.project(order).await
    }

    async fn project(&self, order: Order) -> Result<TrackingView> {
        let position = order.status().timeline_position();
        let timeline = OrderStatus::TIMELINE
            .iter()
            .enumerate()
            .map(|(i, s)| TimelineStep { status: *s, reached: position.is_some_and(|p| i <= p) })
            .collect();

        let ids: Vec<String> = order.items().iter().map(|i| i.product_id.clone()).collect();
        let products = self.catalog.find_products_by_ids(&ids).await?;
        let items = order
            .items()
            .iter()
            .map(|line| {
                let product = products.iter().find(|p| p.id == line.product_id);
                TrackedItem {
                    product_id: line.product_id.clone(),
                    name: line.name.clone(),
                    name_en: product.map(|p| p.name_en.clone()),
                    name_bn: product.map(|p| p.name_bn.clone()),
                    image: product.and_then(|p| p.images.first().cloned()),
                    quantity: line.quantity,
                    price: line.price,
                }
            })
            .collect();

        let delivery_partner = match order.delivery_partner_id() {
            Some(id) => self.catalog.find_delivery_partner(id).await?.map(|p| PartnerSummary {
                name: p.name, name_en: p.name_en, name_bn: p.name_bn, contact_info: p.contact_info,
            }),
            None => None,
        };

        let address = order.shipping_address();
        Ok(TrackingView {
            order_id: order.id(),
            status: order.status(),
            payment_status: order.payment_status(),
            timeline,
            timeline_position: position,
            tracking_number: order.tracking_number().map(str::to_string),
            items,
            total_amount: order.total_amount(),
            currency: order.currency().to_string(),
            recipient: Recipient {
                full_name: address.full_name.clone(), city: address.city.clone(),
                postal_code: address.postal_code.clone(), country: address.country.clone(),
            },
            delivery_partner,
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        })
    }
}
