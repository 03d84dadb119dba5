//! Catalog records as the order flow sees them: products and delivery partners.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub slug: String,
    pub name: String,
    pub name_en: String,
    pub name_bn: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock: i32,
    pub status: ProductStatus,
    pub category_id: Option<String>,
    pub images: Vec<String>,
    pub featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus { #[default] Active, Inactive, OutOfStock }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "ACTIVE", Self::Inactive => "INACTIVE", Self::OutOfStock => "OUT_OF_STOCK" }
    }
}

impl FromStr for ProductStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "OUT_OF_STOCK" => Ok(Self::OutOfStock),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Decimal) -> Self {
        let id = id.into();
        let name = name.into();
        let now = Utc::now();
        Self {
            sku: id.to_uppercase(), slug: id.to_lowercase(), id,
            name_en: name.clone(), name_bn: name.clone(), name,
            price, sale_price: None, stock: 100, status: ProductStatus::Active,
            category_id: None, images: vec![], featured: false, created_at: now, updated_at: now,
        }
    }

    /// Price charged right now: the sale price when one is set.
    pub fn effective_price(&self) -> Decimal { self.sale_price.unwrap_or(self.price) }

    pub fn check_purchasable(&self, quantity: u32) -> Result<(), ProductError> {
        if self.status != ProductStatus::Active { return Err(ProductError::NotAvailable(self.id.clone())); }
        if i64::from(self.stock) < i64::from(quantity) {
            return Err(ProductError::InsufficientStock { product_id: self.id.clone(), available: self.stock.max(0) });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPartner {
    pub id: String,
    pub name: String,
    pub name_en: String,
    pub name_bn: String,
    pub contact_info: serde_json::Value,
    pub service_areas: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DeliveryPartner {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(), name_en: name.clone(), name_bn: name.clone(), name,
            contact_info: serde_json::json!({}), service_areas: vec![], is_active: true, created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError { NotAvailable(String), InsufficientStock { product_id: String, available: i32 } }
impl std::error::Error for ProductError {}
impl fmt::Display for ProductError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable(id) => write!(f, "Product {} is not available for purchase", id),
            Self::InsufficientStock { product_id, available } => write!(f, "Product {} has only {} in stock", product_id, available),
        }
    }
}

/// Stored enum text that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)] pub struct UnknownVariant(pub String);
impl std::error::Error for UnknownVariant {}
impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown value '{}'", self.0) }
}
