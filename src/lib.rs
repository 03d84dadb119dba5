//! Storefront order service
//!
//! Back office for a bilingual (English/Bangla) storefront: checkout, card
//! payments and order tracking.
//!
//! ## Features
//! - Order ledger with server-side price capture
//! - Payment intents with the card processor
//! - Signed webhook reconciliation, applied once per processor event
//! - Public order tracking
//! - Client cart value object with a single persistence boundary

pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod notify;
pub mod payments;
pub mod reconciler;
pub mod store;
pub mod tracking;

use thiserror::Error;

use crate::domain::aggregates::OrderError;
use crate::domain::value_objects::MoneyError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Payment processor error: {0}")]
    Upstream(String),

    #[error("Payments are not configured")]
    PaymentsDisabled,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool { matches!(self, Self::Upstream(_) | Self::Storage(_)) }
}

impl From<OrderError> for StoreError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoItems => Self::EmptyCart,
            OrderError::InvalidTransition { .. } => Self::InvalidTransition(e.to_string()),
            OrderError::Product(_) | OrderError::Money(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<MoneyError> for StoreError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, StoreError>;
