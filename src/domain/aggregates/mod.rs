//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{DeliveryPartner, Product, ProductError, ProductStatus, UnknownVariant};
pub use order::{AdminPatch, LineItem, LineItemRequest, Order, OrderError, OrderStatus, PaymentApplication, PaymentMethod, PaymentStatus, ShippingAddress};
pub use cart::{Cart, CartAction, CartError, CartItem, CartStorage, JsonFileCartStorage, PersistentCart};
