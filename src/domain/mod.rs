//! Domain model: orders, catalog records, the cart and the events they raise.
pub mod aggregates;
pub mod events;
pub mod value_objects;
