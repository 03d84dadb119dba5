//! HTTP surface.

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::Authenticator;
use crate::ledger::OrderLedger;
use crate::payments::PaymentBridge;
use crate::reconciler::WebhookReconciler;
use crate::tracking::TrackingReader;

pub mod error;
pub mod orders;
pub mod payments;
pub mod tracking;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub ledger: Arc<OrderLedger>,
    pub tracking: Arc<TrackingReader>,
    pub auth: Arc<Authenticator>,
    /// `None` when the processor is not configured.
    pub payments: Option<Arc<PaymentBridge>>,
    pub reconciler: Option<Arc<WebhookReconciler>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront"})) }))
        .route("/api/orders", post(orders::create_order).get(orders::list_orders))
        .route("/api/orders/:id", get(orders::get_order).patch(orders::update_order))
        .route("/api/payments/create-intent", post(payments::create_intent))
        .route("/api/payments/webhook", post(payments::webhook))
        .route("/api/track/:query", get(tracking::track_order))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
