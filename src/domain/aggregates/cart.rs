//! Cart Aggregate
//!
//! The shopper's cart is a plain value changed only through [`CartAction`]s.
//! [`PersistentCart`] is the single place that talks to storage: it loads once
//! and saves after every action.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::aggregates::order::LineItemRequest;

/// Display fields are copied from the catalog so the cart renders without a refetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub name_bn: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub image: Option<String>,
    pub sku: String,
    pub quantity: u32,
}

impl CartItem {
    pub fn unit_price(&self) -> Decimal { self.sale_price.unwrap_or(self.price) }
    pub fn line_total(&self) -> Decimal { self.unit_price() * Decimal::from(self.quantity) }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CartAction {
    /// Adds `quantity` (default one) of the item, merging with an existing line.
    Add { item: CartItem, quantity: Option<u32> },
    Remove { product_id: String },
    /// Zero or less removes the line.
    UpdateQuantity { product_id: String, quantity: i64 },
    Clear,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    items: Vec<CartItem>,
    #[serde(skip)]
    total_items: u32,
    #[serde(skip)]
    total_amount: Decimal,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn total_items(&self) -> u32 { self.total_items }
    pub fn total_amount(&self) -> Decimal { self.total_amount }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn apply(mut self, action: CartAction) -> Self {
        match action {
            CartAction::Add { mut item, quantity } => {
                let quantity = quantity.unwrap_or(1).max(1);
                if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
                    existing.quantity = existing.quantity.saturating_add(quantity);
                } else {
                    item.quantity = quantity;
                    self.items.push(item);
                }
            }
            CartAction::Remove { product_id } => self.items.retain(|i| i.product_id != product_id),
            CartAction::UpdateQuantity { product_id, quantity } => {
                if quantity <= 0 {
                    self.items.retain(|i| i.product_id != product_id);
                } else if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
                    item.quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
                }
            }
            CartAction::Clear => self.items.clear(),
        }
        self.recalculate();
        self
    }

    /// The `items` payload for order creation. Prices are not sent; the server captures them.
    pub fn to_order_items(&self) -> Vec<LineItemRequest> {
        self.items.iter().map(|i| LineItemRequest { product_id: i.product_id.clone(), quantity: i.quantity }).collect()
    }

    fn recalculated(mut self) -> Self { self.recalculate(); self }

    fn recalculate(&mut self) {
        self.total_items = self.items.iter().map(|i| i.quantity).sum();
        self.total_amount = self.items.iter().map(CartItem::line_total).sum();
    }
}

pub trait CartStorage {
    fn load(&self) -> Result<Option<Cart>, CartError>;
    fn save(&self, cart: &Cart) -> Result<(), CartError>;
}

/// Keeps the cart as JSON in a single file so it survives restarts.
#[derive(Clone, Debug)]
pub struct JsonFileCartStorage { path: PathBuf }

impl JsonFileCartStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

impl CartStorage for JsonFileCartStorage {
    fn load(&self) -> Result<Option<Cart>, CartError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CartError::Io(e.to_string())),
        };
        let cart: Cart = serde_json::from_slice(&raw).map_err(|e| CartError::Corrupt(e.to_string()))?;
        Ok(Some(cart.recalculated()))
    }

    fn save(&self, cart: &Cart) -> Result<(), CartError> {
        let raw = serde_json::to_vec(cart).map_err(|e| CartError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| CartError::Io(e.to_string()))
    }
}

pub struct PersistentCart<S: CartStorage> { cart: Cart, storage: S }

impl<S: CartStorage> PersistentCart<S> {
    /// A missing or unreadable saved cart starts empty.
    pub fn open(storage: S) -> Self {
        let cart = match storage.load() {
            Ok(cart) => cart.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "discarding saved cart");
                Cart::new()
            }
        };
        Self { cart, storage }
    }

    pub fn cart(&self) -> &Cart { &self.cart }

    pub fn dispatch(&mut self, action: CartAction) -> Result<&Cart, CartError> {
        self.cart = std::mem::take(&mut self.cart).apply(action);
        self.storage.save(&self.cart)?;
        Ok(&self.cart)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { Io(String), Corrupt(String) }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::Io(e) => write!(f, "Cart storage failed: {}", e), Self::Corrupt(e) => write!(f, "Saved cart is unreadable: {}", e) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, price: i64) -> CartItem {
        CartItem {
            product_id: id.into(), name: "Widget".into(), name_bn: "উইজেট".into(), price: Decimal::new(price, 0),
            sale_price: None, image: None, sku: id.to_uppercase(), quantity: 0,
        }
    }

    #[test]
    fn test_cart_operations() {
        let cart = Cart::new()
            .apply(CartAction::Add { item: item("P1", 10), quantity: None })
            .apply(CartAction::Add { item: item("P1", 10), quantity: Some(2) });
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3); // Merged
        assert_eq!(cart.total_amount(), Decimal::new(30, 0));

        let mut sale = item("P2", 20);
        sale.sale_price = Some(Decimal::new(15, 0));
        let cart = cart.apply(CartAction::Add { item: sale, quantity: None });
        assert_eq!(cart.total_items(), 4);
        assert_eq!(cart.total_amount(), Decimal::new(45, 0));

        let cart = cart.apply(CartAction::UpdateQuantity { product_id: "P1".into(), quantity: 0 });
        assert_eq!(cart.items().len(), 1);
        let cart = cart.apply(CartAction::Remove { product_id: "P2".into() });
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_to_order_items() {
        let cart = Cart::new().apply(CartAction::Add { item: item("p1", 25), quantity: Some(2) });
        let items = cart.to_order_items();
        assert_eq!(items, vec![LineItemRequest { product_id: "p1".into(), quantity: 2 }]);
    }

    #[test]
    fn test_cart_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.json");
        let mut persistent = PersistentCart::open(JsonFileCartStorage::new(&path));
        persistent.dispatch(CartAction::Add { item: item("p1", 25), quantity: Some(2) }).unwrap();

        let reloaded = PersistentCart::open(JsonFileCartStorage::new(&path));
        assert_eq!(reloaded.cart().items().len(), 1);
        assert_eq!(reloaded.cart().total_amount(), Decimal::new(50, 0));
    }

    #[test]
    fn test_corrupt_cart_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.json");
        std::fs::write(&path, b"not json").unwrap();
        let persistent = PersistentCart::open(JsonFileCartStorage::new(&path));
        assert!(persistent.cart().is_empty());
    }
}
